//! Checkout sessions persisted through the tiered cache.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{CheckoutSession, CheckoutStatus, PaymentDetails, SessionPatch};
use crate::cache::{KeyGuard, KeyLocks, SetOptions, StorageTier, TieredCache};
use crate::content::{ContentError, ContentService};
use crate::keys::{self, KeyError, ResourceKind, SEPARATOR};
use crate::pricing::PricingCatalog;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
  #[error("checkout session {0} not found")]
  NotFound(String),
  #[error("checkout session {0} is already completed")]
  Conflict(String),
  #[error("checkout session {id} cannot move from {from} to {to}")]
  InvalidTransition {
    id: String,
    from: CheckoutStatus,
    to: CheckoutStatus,
  },
  #[error("checkout session {0} has another change in progress")]
  Busy(String),
  #[error("a checkout session needs at least one location")]
  NoLocations,
  #[error("checkout session {0} has no package selected")]
  MissingPackage(String),
  #[error("package {0} is not in the catalog")]
  UnknownPackage(String),
  #[error(transparent)]
  Key(#[from] KeyError),
  #[error("failed to decode checkout session {id}: {source}")]
  Decode {
    id: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("failed to encode checkout session: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("content service did not accept checkout {id}: {source}")]
  Upstream {
    id: String,
    #[source]
    source: ContentError,
  },
}

/// Where and for how long sessions are kept.
#[derive(Debug, Clone)]
pub struct SessionSettings {
  pub namespace: String,
  pub ttl: Duration,
  pub tier: StorageTier,
}

/// Store for checkout sessions.
///
/// Writers sharing one store are serialized per session: `complete` holds
/// the session across its backend call, and edits arriving meanwhile fail
/// with [`SessionError::Busy`]. Separate stores over the same persistent
/// tier (two tabs, two devices) are not coordinated: the last
/// `create_or_update` to reach that tier wins.
pub struct CheckoutStore {
  cache: Arc<TieredCache>,
  catalog: Arc<PricingCatalog>,
  content: Arc<dyn ContentService>,
  settings: SessionSettings,
  locks: KeyLocks,
}

impl CheckoutStore {
  pub fn new(
    cache: Arc<TieredCache>,
    catalog: Arc<PricingCatalog>,
    content: Arc<dyn ContentService>,
    settings: SessionSettings,
  ) -> Self {
    Self {
      cache,
      catalog,
      content,
      settings,
      locks: KeyLocks::new(),
    }
  }

  pub fn catalog(&self) -> &PricingCatalog {
    &self.catalog
  }

  fn key(&self, user_id: &str, session_id: &str) -> Result<String, KeyError> {
    keys::build_key(
      &self.settings.namespace,
      user_id,
      ResourceKind::Session,
      session_id,
    )
  }

  fn try_lock(&self, key: &str, session_id: &str) -> Result<KeyGuard<'_>, SessionError> {
    self
      .locks
      .try_lock(key)
      .ok_or_else(|| SessionError::Busy(session_id.to_string()))
  }

  fn options(&self) -> SetOptions {
    SetOptions::new(self.settings.ttl, self.settings.tier)
  }

  fn load(
    &self,
    key: &str,
    session_id: &str,
  ) -> Result<Option<CheckoutSession>, SessionError> {
    self
      .cache
      .get_json(key)
      .map_err(|source| SessionError::Decode {
        id: session_id.to_string(),
        source,
      })
  }

  fn load_existing(&self, key: &str, session_id: &str) -> Result<CheckoutSession, SessionError> {
    self
      .load(key, session_id)?
      .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
  }

  fn persist(&self, key: &str, session: &CheckoutSession) -> Result<(), SessionError> {
    self.cache.set_json(key, session, self.options())?;
    Ok(())
  }

  fn reprice(&self, session: &mut CheckoutSession) {
    session.total_cost = self
      .catalog
      .quote(
        session.selected_package.as_deref(),
        session.livestream_duration,
        session.locations.len(),
      )
      .total;
  }

  /// Fetch one session. Expired or unknown ids yield `None`.
  pub fn get(
    &self,
    user_id: &str,
    session_id: &str,
  ) -> Result<Option<CheckoutSession>, SessionError> {
    let key = self.key(user_id, session_id)?;
    self.load(&key, session_id)
  }

  /// Start a new session under a freshly generated id.
  pub fn begin(&self, user_id: &str, patch: SessionPatch) -> Result<CheckoutSession, SessionError> {
    let session_id = Uuid::new_v4().to_string();
    self.create_or_update(user_id, &session_id, patch)
  }

  /// Merge `patch` into the session, creating it if absent.
  ///
  /// The result is `pending` unless the patch asks for `saved`. `saved_at`
  /// and `total_cost` are always refreshed. Completed sessions are
  /// read-only.
  ///
  /// Drafts may be stored without locations while the configuration is
  /// still being filled in, but a patch cannot clear them once given.
  /// [`complete`](Self::complete) requires at least one.
  pub fn create_or_update(
    &self,
    user_id: &str,
    session_id: &str,
    patch: SessionPatch,
  ) -> Result<CheckoutSession, SessionError> {
    let key = self.key(user_id, session_id)?;
    let _guard = self.try_lock(&key, session_id)?;
    let now = self.cache.now();

    let mut session = match self.load(&key, session_id)? {
      Some(existing) => existing,
      None => {
        debug!(user_id, session_id, "Creating checkout session");
        CheckoutSession::new(session_id, now)
      }
    };

    if session.checkout_status.is_terminal() {
      return Err(SessionError::Conflict(session_id.to_string()));
    }
    if matches!(&patch.locations, Some(locations) if locations.is_empty()) {
      return Err(SessionError::NoLocations);
    }

    let status = if patch.save {
      CheckoutStatus::Saved
    } else {
      CheckoutStatus::Pending
    };
    session.apply(patch);
    session.checkout_status = status;
    session.saved_at = now;
    self.reprice(&mut session);

    self.persist(&key, &session)?;
    Ok(session)
  }

  /// Pause a pending session. Any other status is left untouched and
  /// reported as an invalid transition.
  pub fn mark_saved(
    &self,
    user_id: &str,
    session_id: &str,
  ) -> Result<CheckoutSession, SessionError> {
    let key = self.key(user_id, session_id)?;
    let _guard = self.try_lock(&key, session_id)?;
    let mut session = self.load_existing(&key, session_id)?;

    if session.checkout_status != CheckoutStatus::Pending {
      return Err(SessionError::InvalidTransition {
        id: session_id.to_string(),
        from: session.checkout_status,
        to: CheckoutStatus::Saved,
      });
    }

    session.checkout_status = CheckoutStatus::Saved;
    session.saved_at = self.cache.now();
    self.persist(&key, &session)?;
    Ok(session)
  }

  /// Complete a pending or saved session with its payment details.
  ///
  /// The session needs at least one location and a package from the
  /// catalog. The completed record goes to the content service first; only
  /// when it is accepted is the cached session advanced. The session stays
  /// locked for the whole call, so an overlapping completion waits and then
  /// fails with a conflict, never touching the stored payment details.
  pub async fn complete(
    &self,
    user_id: &str,
    session_id: &str,
    payment: PaymentDetails,
  ) -> Result<CheckoutSession, SessionError> {
    let key = self.key(user_id, session_id)?;
    let _guard = self.locks.lock(&key).await;
    let current = self.load_existing(&key, session_id)?;

    if current.checkout_status.is_terminal() {
      return Err(SessionError::Conflict(session_id.to_string()));
    }
    if current.locations.is_empty() {
      return Err(SessionError::NoLocations);
    }
    match current.selected_package.as_deref() {
      None => return Err(SessionError::MissingPackage(session_id.to_string())),
      Some(package) if self.catalog.base_price(package).is_none() => {
        return Err(SessionError::UnknownPackage(package.to_string()));
      }
      Some(_) => {}
    }

    let mut completed = current;
    completed.checkout_status = CheckoutStatus::Completed;
    completed.payment_details = Some(payment);
    completed.saved_at = self.cache.now();
    self.reprice(&mut completed);

    if let Err(source) = self.content.persist_checkout(user_id, &completed).await {
      warn!(
        user_id,
        session_id,
        error = %source,
        "Checkout not persisted, session left unchanged"
      );
      return Err(SessionError::Upstream {
        id: session_id.to_string(),
        source,
      });
    }

    self.persist(&key, &completed)?;
    info!(user_id, session_id, total = completed.total_cost, "Checkout completed");
    Ok(completed)
  }

  /// Drop a session that was never completed.
  pub fn discard(&self, user_id: &str, session_id: &str) -> Result<(), SessionError> {
    let key = self.key(user_id, session_id)?;
    let _guard = self.try_lock(&key, session_id)?;
    let session = self.load_existing(&key, session_id)?;
    if session.checkout_status.is_terminal() {
      return Err(SessionError::Conflict(session_id.to_string()));
    }
    self.cache.delete(&key);
    Ok(())
  }

  /// All live sessions of `user_id` with `status`, most recently saved
  /// first. Records that no longer decode are skipped.
  pub fn list_by_status(
    &self,
    user_id: &str,
    status: CheckoutStatus,
  ) -> Result<Vec<CheckoutSession>, SessionError> {
    let prefix = format!(
      "{}{}",
      keys::prefix(&self.settings.namespace, user_id, ResourceKind::Session)?,
      SEPARATOR
    );

    let mut sessions: Vec<CheckoutSession> = self
      .cache
      .keys_with_prefix(&prefix)
      .into_iter()
      .filter_map(|key| match self.cache.get_json::<CheckoutSession>(&key) {
        Ok(found) => found,
        Err(e) => {
          warn!(key = %key, error = %e, "Skipping unreadable checkout session");
          None
        }
      })
      .filter(|s| s.checkout_status == status)
      .collect();

    sessions.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    Ok(sessions)
  }
}
