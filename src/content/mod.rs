//! Boundary to the backend content service.
//!
//! The core treats the backend as a remote store with success/4xx/5xx
//! responses. It never retries on its own; see [`propagate_role`] for the
//! one calling-layer flow that does.

mod client;

pub use client::HttpContentClient;

use async_trait::async_trait;
use tracing::info;

use crate::checkout::CheckoutSession;
use crate::contribution::ContributionRequest;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
  #[error("content service rejected the request ({status}): {message}")]
  Client { status: u16, message: String },
  #[error("content service failed ({status}): {message}")]
  Server { status: u16, message: String },
  #[error("content service unreachable: {0}")]
  Transport(String),
  #[error("unexpected content service response: {0}")]
  InvalidResponse(String),
  #[error("role {role} for {user_id} did not propagate")]
  NotPropagated { user_id: String, role: String },
}

impl ContentError {
  /// Classify a non-success HTTP status.
  pub fn from_status(status: u16, message: impl Into<String>) -> Self {
    let message = message.into();
    if (400..500).contains(&status) {
      Self::Client { status, message }
    } else {
      Self::Server { status, message }
    }
  }

  /// Server-side and transport failures may succeed on a later attempt.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Server { .. } | Self::Transport(_))
  }
}

/// Remote CRUD operations the core depends on.
#[async_trait]
pub trait ContentService: Send + Sync {
  /// Persist a completed checkout as a tribute record owned by `user_id`.
  async fn persist_checkout(&self, user_id: &str, session: &CheckoutSession)
    -> Result<(), ContentError>;

  /// Create or update a contribution request.
  async fn store_contribution_request(
    &self,
    request: &ContributionRequest,
  ) -> Result<(), ContentError>;

  async fn assign_role(&self, user_id: &str, role: &str) -> Result<(), ContentError>;

  /// The role currently visible for `user_id`, if any.
  async fn fetch_role(&self, user_id: &str) -> Result<Option<String>, ContentError>;
}

/// Assign `role` to `user_id` and wait until reads reflect it.
///
/// Role assignments propagate asynchronously on the backend, so both the
/// write and the confirming read run under `policy`.
pub async fn propagate_role(
  service: &dyn ContentService,
  policy: &RetryPolicy,
  user_id: &str,
  role: &str,
) -> Result<(), ContentError> {
  policy
    .run(|_| service.assign_role(user_id, role), ContentError::is_transient)
    .await?;

  policy
    .run(
      |_| async move {
        match service.fetch_role(user_id).await? {
          Some(current) if current == role => Ok::<(), ContentError>(()),
          _ => Err(ContentError::NotPropagated {
            user_id: user_id.to_string(),
            role: role.to_string(),
          }),
        }
      },
      |e: &ContentError| e.is_transient() || matches!(e, ContentError::NotPropagated { .. }),
    )
    .await?;

  info!(user_id, role, "Role propagated");
  Ok(())
}
