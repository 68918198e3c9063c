//! Wall-clock source for entry timestamps and expiry checks.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of the current time in milliseconds since the Unix epoch.
///
/// Expiry is evaluated against wall-clock time; skew or system sleep can
/// shift it and that is accepted.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> i64;

  /// Current time as a UTC datetime.
  fn now(&self) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(self.now_ms()).unwrap_or_default()
  }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  now_ms: AtomicI64,
}

impl ManualClock {
  pub fn new(start_ms: i64) -> Self {
    Self {
      now_ms: AtomicI64::new(start_ms),
    }
  }

  pub fn advance(&self, by: Duration) {
    let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
    self.now_ms.fetch_add(by, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_ms(&self) -> i64 {
    self.now_ms.load(Ordering::SeqCst)
  }
}
