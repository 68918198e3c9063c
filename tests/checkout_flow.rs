use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tribute_core::cache::{
  ManualClock, MemoryStorage, SetOptions, SqliteStorage, StorageTier, TierStorage, TieredCache,
};
use tribute_core::checkout::{
  CheckoutSession, CheckoutStatus, Location, PaymentDetails, ResumeOutcome, SessionError,
  SessionPatch,
};
use tribute_core::config::Config;
use tribute_core::content::{ContentError, ContentService};
use tribute_core::contribution::{ContributionError, ContributionRequest};
use tribute_core::TributeCore;

const START: i64 = 1_704_067_200_000;

#[derive(Default)]
struct RecordingContent {
  checkouts: Mutex<Vec<CheckoutSession>>,
  fail_checkout: Mutex<Option<ContentError>>,
}

#[async_trait]
impl ContentService for RecordingContent {
  async fn persist_checkout(
    &self,
    _user_id: &str,
    session: &CheckoutSession,
  ) -> Result<(), ContentError> {
    if let Some(e) = self.fail_checkout.lock().unwrap().take() {
      return Err(e);
    }
    self.checkouts.lock().unwrap().push(session.clone());
    Ok(())
  }

  async fn store_contribution_request(
    &self,
    _request: &ContributionRequest,
  ) -> Result<(), ContentError> {
    Ok(())
  }

  async fn assign_role(&self, _user_id: &str, _role: &str) -> Result<(), ContentError> {
    Ok(())
  }

  async fn fetch_role(&self, _user_id: &str) -> Result<Option<String>, ContentError> {
    Ok(None)
  }
}

struct Harness {
  core: TributeCore,
  clock: Arc<ManualClock>,
  content: Arc<RecordingContent>,
}

fn harness_over(
  scoped: Arc<dyn TierStorage>,
  persistent: Arc<dyn TierStorage>,
  clock: Arc<ManualClock>,
) -> Harness {
  let cache = Arc::new(TieredCache::new(scoped, persistent).with_clock(clock.clone()));
  let content = Arc::new(RecordingContent::default());
  let core = TributeCore::with_parts(&Config::default(), cache, content.clone());
  Harness { core, clock, content }
}

fn harness() -> Harness {
  harness_over(
    Arc::new(MemoryStorage::new()),
    Arc::new(MemoryStorage::new()),
    Arc::new(ManualClock::new(START)),
  )
}

fn location(name: &str) -> Location {
  Location {
    name: name.to_string(),
    address: "12 Elm St".to_string(),
    start_time: "11:00".to_string(),
    duration: 1,
  }
}

fn configure(package: &str, hours: u32, locations: &[&str]) -> SessionPatch {
  SessionPatch {
    customer_name: Some("Grace Hopper".to_string()),
    email: Some("grace@example.com".to_string()),
    selected_package: Some(package.to_string()),
    livestream_duration: Some(hours),
    locations: Some(locations.iter().map(|n| location(n)).collect()),
    ..Default::default()
  }
}

fn payment() -> PaymentDetails {
  PaymentDetails {
    billing_name: "Grace Hopper".to_string(),
    billing_address: "12 Elm St".to_string(),
    card_last4: "1111".to_string(),
  }
}

#[test]
fn test_solo_package_single_location_costs_base_price() {
  let h = harness();
  let session = h
    .core
    .checkout
    .create_or_update("user-1", "s1", configure("solo", 1, &["Chapel"]))
    .unwrap();
  assert_eq!(session.total_cost, 399);
}

#[test]
fn test_extra_hours_and_locations_are_added() {
  let h = harness();
  let session = h
    .core
    .checkout
    .create_or_update("user-1", "s1", configure("solo", 3, &["Chapel", "Graveside"]))
    .unwrap();
  assert_eq!(session.total_cost, 399 + 2 * 100 + 50);

  let outcome = h.core.resume.resume("user-1", "s1").unwrap();
  let view = outcome.view().unwrap();
  assert_eq!(view.pricing.extra_hours_cost, 200);
  assert_eq!(view.pricing.extra_locations_cost, 50);
  assert_eq!(view.pricing.total, 649);
}

#[tokio::test]
async fn test_mark_saved_after_completion_fails() {
  let h = harness();
  h.core
    .checkout
    .create_or_update("user-1", "s1", configure("anywhere", 1, &["Chapel"]))
    .unwrap();
  h.core.checkout.complete("user-1", "s1", payment()).await.unwrap();

  assert!(matches!(
    h.core.checkout.mark_saved("user-1", "s1").unwrap_err(),
    SessionError::InvalidTransition { .. }
  ));
  let stored = h.core.checkout.get("user-1", "s1").unwrap().unwrap();
  assert_eq!(stored.checkout_status, CheckoutStatus::Completed);
}

#[tokio::test]
async fn test_duplicate_pending_contribution_conflicts() {
  let h = harness();
  h.core.contributions.create("tribute-9", "cousin").await.unwrap();

  let err = h
    .core
    .contributions
    .create("tribute-9", "cousin")
    .await
    .unwrap_err();
  assert!(matches!(err, ContributionError::DuplicatePending { .. }));
}

#[test]
fn test_expired_entry_is_purged_from_every_tier() {
  let scoped = Arc::new(MemoryStorage::new());
  let persistent = Arc::new(MemoryStorage::new());
  let h = harness_over(scoped.clone(), persistent.clone(), Arc::new(ManualClock::new(START)));

  h.core.cache.set(
    "tribute:user-1:session:s1",
    serde_json::json!({"draft": true}),
    SetOptions::new(Duration::from_millis(1_000), StorageTier::DurableA),
  );
  assert_eq!(scoped.len(), 1);

  h.clock.advance(Duration::from_millis(1_500));
  assert!(h.core.cache.get("tribute:user-1:session:s1").is_none());
  assert!(scoped.is_empty());
  assert!(persistent.is_empty());
}

#[test]
fn test_last_writer_wins_across_processes() {
  let scoped: Arc<dyn TierStorage> = Arc::new(MemoryStorage::new());
  let persistent: Arc<dyn TierStorage> = Arc::new(MemoryStorage::new());
  let clock = Arc::new(ManualClock::new(START));

  let tab_a = harness_over(scoped.clone(), persistent.clone(), clock.clone());
  let tab_b = harness_over(scoped.clone(), persistent.clone(), clock.clone());

  tab_a
    .core
    .checkout
    .create_or_update("user-1", "s1", configure("solo", 1, &["Chapel"]))
    .unwrap();
  clock.advance(Duration::from_secs(5));
  tab_b
    .core
    .checkout
    .create_or_update("user-1", "s1", configure("legacy", 2, &["Chapel"]))
    .unwrap();
  clock.advance(Duration::from_secs(5));
  // A stale edit from the first tab lands last
  tab_a
    .core
    .checkout
    .create_or_update(
      "user-1",
      "s1",
      SessionPatch {
        phone_number: Some("555-0100".to_string()),
        ..Default::default()
      },
    )
    .unwrap();

  let fresh = harness_over(scoped, persistent, clock);
  let session = fresh.core.checkout.get("user-1", "s1").unwrap().unwrap();
  assert_eq!(session.selected_package.as_deref(), Some("solo"));
  assert_eq!(session.phone_number, "555-0100");
  assert_eq!(session.total_cost, 399);
}

#[tokio::test]
async fn test_failed_payment_can_be_retried_after_resume() {
  let h = harness();
  h.core
    .checkout
    .create_or_update("user-1", "s1", configure("legacy", 2, &["Chapel", "Hall"]))
    .unwrap();
  h.core.checkout.mark_saved("user-1", "s1").unwrap();

  *h.content.fail_checkout.lock().unwrap() = Some(ContentError::from_status(503, "unavailable"));
  assert!(h.core.checkout.complete("user-1", "s1", payment()).await.is_err());

  let ResumeOutcome::Configure(view) = h.core.resume.resume("user-1", "s1").unwrap() else {
    panic!("saved session should resume into configuration");
  };
  assert_eq!(view.session.checkout_status, CheckoutStatus::Saved);
  assert!(view.session.payment_details.is_none());

  let completed = h.core.checkout.complete("user-1", "s1", payment()).await.unwrap();
  assert_eq!(completed.total_cost, 2999 + 100 + 50);
  assert_eq!(h.content.checkouts.lock().unwrap().len(), 1);
  assert!(matches!(
    h.core.resume.resume("user-1", "s1").unwrap(),
    ResumeOutcome::Receipt(_)
  ));
}

#[test]
fn test_sessions_survive_restart_in_sqlite() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("cache.db");
  let clock = Arc::new(ManualClock::new(START));

  let open = |clock: Arc<ManualClock>| {
    harness_over(
      Arc::new(SqliteStorage::open_at(&path, StorageTier::DurableA).unwrap()),
      Arc::new(SqliteStorage::open_at(&path, StorageTier::DurableB).unwrap()),
      clock,
    )
  };

  {
    let first = open(clock.clone());
    first
      .core
      .checkout
      .create_or_update("user-1", "s1", configure("solo", 1, &["Chapel"]))
      .unwrap();
    first.core.checkout.mark_saved("user-1", "s1").unwrap();
  }

  clock.advance(Duration::from_secs(2 * 24 * 60 * 60));
  let second = open(clock.clone());
  let resumable = second.core.resume.resumable("user-1").unwrap();
  assert_eq!(resumable.len(), 1);
  assert_eq!(resumable[0].session.id, "s1");
  assert_eq!(resumable[0].session.checkout_status, CheckoutStatus::Saved);

  // Past the 7 day session window it is gone
  clock.advance(Duration::from_secs(6 * 24 * 60 * 60));
  let third = open(clock);
  assert_eq!(
    third.core.resume.resume("user-1", "s1").unwrap(),
    ResumeOutcome::NotResumable
  );
}
