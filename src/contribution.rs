//! Requests from third parties to add media to a tribute they do not own.
//!
//! Records are keyed under the contributor, so a contributor's own listing
//! is a single prefix scan. Owners see every request whose tribute they own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{KeyLocks, SetOptions, StorageTier, TieredCache};
use crate::content::{ContentError, ContentService};
use crate::keys::{self, KeyError, ResourceKind, SEPARATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionStatus {
  Pending,
  Approved,
  Rejected,
}

impl ContributionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Approved => "approved",
      Self::Rejected => "rejected",
    }
  }
}

impl fmt::Display for ContributionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The owner's answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
  Approved,
  Rejected,
}

impl From<Decision> for ContributionStatus {
  fn from(decision: Decision) -> Self {
    match decision {
      Decision::Approved => Self::Approved,
      Decision::Rejected => Self::Rejected,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRequest {
  pub id: String,
  pub tribute_id: String,
  pub contributor_id: String,
  pub status: ContributionStatus,
  pub request_date: DateTime<Utc>,
  /// Set when the request leaves `pending`
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub response_date: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContributionError {
  #[error("{contributor_id} already has a pending request for tribute {tribute_id}")]
  DuplicatePending {
    tribute_id: String,
    contributor_id: String,
  },
  #[error("contribution request {id} was already {status}")]
  AlreadyDecided {
    id: String,
    status: ContributionStatus,
  },
  #[error("contribution request {0} not found")]
  NotFound(String),
  #[error(transparent)]
  Key(#[from] KeyError),
  #[error("failed to encode contribution request: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("content service did not accept contribution request {id}: {source}")]
  Upstream {
    id: String,
    #[source]
    source: ContentError,
  },
}

/// Overlapping calls through one workflow are serialized: `create` per
/// (tribute, contributor) pair and `respond` per request, each held across
/// its backend call.
pub struct ContributionWorkflow {
  cache: Arc<TieredCache>,
  content: Arc<dyn ContentService>,
  namespace: String,
  ttl: Duration,
  tier: StorageTier,
  pair_locks: KeyLocks,
  request_locks: KeyLocks,
}

impl ContributionWorkflow {
  pub fn new(
    cache: Arc<TieredCache>,
    content: Arc<dyn ContentService>,
    namespace: impl Into<String>,
    ttl: Duration,
    tier: StorageTier,
  ) -> Self {
    Self {
      cache,
      content,
      namespace: namespace.into(),
      ttl,
      tier,
      pair_locks: KeyLocks::new(),
      request_locks: KeyLocks::new(),
    }
  }

  /// Open a new pending request from `contributor_id` on `tribute_id`.
  ///
  /// At most one request per contributor and tribute may be pending.
  pub async fn create(
    &self,
    tribute_id: &str,
    contributor_id: &str,
  ) -> Result<ContributionRequest, ContributionError> {
    if tribute_id.is_empty() {
      return Err(KeyError::EmptyComponent("tribute id").into());
    }
    // Lock name only; requests themselves are keyed by request id
    let pair = keys::build_key(
      &self.namespace,
      contributor_id,
      ResourceKind::ContributionRequest,
      tribute_id,
    )?;
    let _guard = self.pair_locks.lock(&pair).await;

    let pending = self
      .list_for_contributor(contributor_id)?
      .into_iter()
      .any(|r| r.tribute_id == tribute_id && r.status == ContributionStatus::Pending);
    if pending {
      return Err(ContributionError::DuplicatePending {
        tribute_id: tribute_id.to_string(),
        contributor_id: contributor_id.to_string(),
      });
    }

    let request = ContributionRequest {
      id: Uuid::new_v4().to_string(),
      tribute_id: tribute_id.to_string(),
      contributor_id: contributor_id.to_string(),
      status: ContributionStatus::Pending,
      request_date: self.cache.now(),
      response_date: None,
    };

    self.store(&request).await?;
    info!(request_id = %request.id, tribute_id, contributor_id, "Contribution requested");
    Ok(request)
  }

  /// Decide a pending request. A request is decided exactly once.
  pub async fn respond(
    &self,
    request_id: &str,
    decision: Decision,
  ) -> Result<ContributionRequest, ContributionError> {
    let _guard = self.request_locks.lock(request_id).await;
    let current = self
      .find(request_id)
      .ok_or_else(|| ContributionError::NotFound(request_id.to_string()))?;

    if current.status != ContributionStatus::Pending {
      return Err(ContributionError::AlreadyDecided {
        id: request_id.to_string(),
        status: current.status,
      });
    }

    let mut decided = current;
    decided.status = decision.into();
    decided.response_date = Some(self.cache.now());

    self.store(&decided).await?;
    info!(request_id, status = %decided.status, "Contribution request decided");
    Ok(decided)
  }

  /// Requests on any tribute in `owned_tribute_ids`, newest first.
  pub fn list_for_owner(
    &self,
    owned_tribute_ids: &[&str],
  ) -> Result<Vec<ContributionRequest>, ContributionError> {
    let mut requests: Vec<ContributionRequest> = self
      .all()?
      .into_iter()
      .filter(|r| owned_tribute_ids.contains(&r.tribute_id.as_str()))
      .collect();
    sort_newest_first(&mut requests);
    Ok(requests)
  }

  /// Requests made by `contributor_id`, newest first.
  pub fn list_for_contributor(
    &self,
    contributor_id: &str,
  ) -> Result<Vec<ContributionRequest>, ContributionError> {
    let prefix = format!(
      "{}{}",
      keys::prefix(&self.namespace, contributor_id, ResourceKind::ContributionRequest)?,
      SEPARATOR
    );
    let mut requests = self.load_all(self.cache.keys_with_prefix(&prefix));
    sort_newest_first(&mut requests);
    Ok(requests)
  }

  /// Send `request` to the content service, then cache it. Nothing is
  /// cached when the service refuses.
  async fn store(&self, request: &ContributionRequest) -> Result<(), ContributionError> {
    let key = keys::build_key(
      &self.namespace,
      &request.contributor_id,
      ResourceKind::ContributionRequest,
      &request.id,
    )?;

    if let Err(source) = self.content.store_contribution_request(request).await {
      warn!(request_id = %request.id, error = %source, "Contribution request not stored");
      return Err(ContributionError::Upstream {
        id: request.id.clone(),
        source,
      });
    }

    self
      .cache
      .set_json(&key, request, SetOptions::new(self.ttl, self.tier))?;
    Ok(())
  }

  fn find(&self, request_id: &str) -> Option<ContributionRequest> {
    let prefix = keys::namespace_prefix(&self.namespace).ok()?;
    let matching = self
      .cache
      .keys_with_prefix(&prefix)
      .into_iter()
      .filter(|key| {
        keys::parse_key(key)
          .map(|parts| {
            parts.kind == ResourceKind::ContributionRequest && parts.resource_id == request_id
          })
          .unwrap_or(false)
      })
      .collect();
    self.load_all(matching).into_iter().next()
  }

  fn all(&self) -> Result<Vec<ContributionRequest>, ContributionError> {
    let prefix = keys::namespace_prefix(&self.namespace)?;
    let matching = self
      .cache
      .keys_with_prefix(&prefix)
      .into_iter()
      .filter(|key| {
        keys::parse_key(key)
          .map(|parts| parts.kind == ResourceKind::ContributionRequest)
          .unwrap_or(false)
      })
      .collect();
    Ok(self.load_all(matching))
  }

  fn load_all(&self, keys: Vec<String>) -> Vec<ContributionRequest> {
    keys
      .into_iter()
      .filter_map(|key| match self.cache.get_json::<ContributionRequest>(&key) {
        Ok(found) => found,
        Err(e) => {
          warn!(key = %key, error = %e, "Skipping unreadable contribution request");
          None
        }
      })
      .collect()
  }
}

fn sort_newest_first(requests: &mut [ContributionRequest]) {
  requests.sort_by(|a, b| b.request_date.cmp(&a.request_date));
}
