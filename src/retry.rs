//! Bounded exponential retry around a single external call.
//!
//! The cache and session core never retry on their own. Calling layers wrap
//! one remote operation in a [`RetryPolicy`] when they need to, e.g. waiting
//! for a role assignment to propagate.

use serde::Deserialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts including the first. Zero is treated as one.
  pub max_attempts: u32,
  /// Delay after the first failure
  pub base_delay_ms: u64,
  /// Upper bound for any single delay
  pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay_ms: 200,
      max_delay_ms: 5_000,
    }
  }
}

impl RetryPolicy {
  /// Delay to wait after failed attempt number `attempt` (zero-based):
  /// `base * 2^attempt`, capped at `max_delay_ms`.
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
    Duration::from_millis(delay)
  }

  /// Run `op` until it succeeds, `should_retry` rejects the error, or the
  /// attempts run out. The last error is returned.
  ///
  /// `op` receives the zero-based attempt number.
  pub async fn run<T, E, F, Fut, R>(&self, mut op: F, should_retry: R) -> Result<T, E>
  where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
  {
    let attempts = self.max_attempts.max(1);
    let mut attempt = 0;

    loop {
      match op(attempt).await {
        Ok(value) => return Ok(value),
        Err(e) if attempt + 1 < attempts && should_retry(&e) => {
          let delay = self.delay_for_attempt(attempt);
          debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Retrying after failure"
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(e) => {
          warn!(attempts = attempt + 1, error = %e, "Giving up after failure");
          return Err(e);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn fast(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
      max_attempts,
      base_delay_ms: 1,
      max_delay_ms: 4,
    }
  }

  #[test]
  fn test_delay_grows_exponentially_and_caps() {
    let policy = RetryPolicy {
      max_attempts: 10,
      base_delay_ms: 100,
      max_delay_ms: 1_000,
    };
    assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
    assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1_000));
    assert_eq!(policy.delay_for_attempt(80), Duration::from_millis(1_000));
  }

  #[tokio::test]
  async fn test_succeeds_after_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result = fast(5)
      .run(
        |attempt| {
          counter.fetch_add(1, Ordering::SeqCst);
          async move {
            if attempt < 2 {
              Err("not yet".to_string())
            } else {
              Ok(attempt)
            }
          }
        },
        |_| true,
      )
      .await;

    assert_eq!(result, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_stops_at_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), String> = fast(3)
      .run(
        |_| {
          counter.fetch_add(1, Ordering::SeqCst);
          async { Err("down".to_string()) }
        },
        |_| true,
      )
      .await;

    assert_eq!(result, Err("down".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_non_retryable_error_returns_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), String> = fast(5)
      .run(
        |_| {
          counter.fetch_add(1, Ordering::SeqCst);
          async { Err("bad request".to_string()) }
        },
        |e| !e.starts_with("bad"),
      )
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_zero_attempts_still_runs_once() {
    let result: Result<u32, String> = fast(0).run(|_| async { Ok(7) }, |_| true).await;
    assert_eq!(result, Ok(7));
  }
}
