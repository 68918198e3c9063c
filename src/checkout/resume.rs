//! Re-entering a checkout where the user left off.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::store::{CheckoutStore, SessionError};
use super::types::{CheckoutSession, CheckoutStatus};
use crate::pricing::PriceBreakdown;

/// A session rebuilt for display.
///
/// `pricing` always follows the current catalog. For sessions still being
/// configured, `session.total_cost` is replaced by that total; a receipt
/// keeps the amount that was charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeView {
  pub session: CheckoutSession,
  pub pricing: PriceBreakdown,
}

/// Where a resumed session should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
  /// Expired or never existed; start configuring from scratch
  NotResumable,
  /// Pending or saved; re-enter configuration at the stored values
  Configure(ResumeView),
  /// Completed; show the receipt, never the payment form
  Receipt(ResumeView),
}

impl ResumeOutcome {
  pub fn view(&self) -> Option<&ResumeView> {
    match self {
      Self::NotResumable => None,
      Self::Configure(view) | Self::Receipt(view) => Some(view),
    }
  }
}

/// Looks up prior sessions and rebuilds their view. Never writes.
#[derive(Clone)]
pub struct ResumeController {
  store: Arc<CheckoutStore>,
}

impl ResumeController {
  pub fn new(store: Arc<CheckoutStore>) -> Self {
    Self { store }
  }

  /// Rebuild the view for one session.
  ///
  /// The price breakdown is derived from the stored fields, not from the
  /// stored total, so it follows the current pricing rules. A stored record
  /// that fails to decode is an error rather than `NotResumable`.
  pub fn resume(&self, user_id: &str, session_id: &str) -> Result<ResumeOutcome, SessionError> {
    let Some(session) = self.store.get(user_id, session_id)? else {
      debug!(user_id, session_id, "Session not resumable");
      return Ok(ResumeOutcome::NotResumable);
    };

    let view = self.view_of(session);
    Ok(match view.session.checkout_status {
      CheckoutStatus::Completed => ResumeOutcome::Receipt(view),
      CheckoutStatus::Pending | CheckoutStatus::Saved => ResumeOutcome::Configure(view),
    })
  }

  /// Sessions the user can pick up again, most recently saved first.
  pub fn resumable(&self, user_id: &str) -> Result<Vec<ResumeView>, SessionError> {
    let mut sessions = self.store.list_by_status(user_id, CheckoutStatus::Pending)?;
    sessions.extend(self.store.list_by_status(user_id, CheckoutStatus::Saved)?);
    sessions.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));

    Ok(sessions.into_iter().map(|s| self.view_of(s)).collect())
  }

  fn view_of(&self, mut session: CheckoutSession) -> ResumeView {
    let pricing = self.store.catalog().quote(
      session.selected_package.as_deref(),
      session.livestream_duration,
      session.locations.len(),
    );
    if !session.checkout_status.is_terminal() {
      session.total_cost = pricing.total;
    }
    ResumeView { session, pricing }
  }
}
