//! Per-key locks for read-modify-write sequences that span an `await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

type Slots = HashMap<String, Arc<AsyncMutex<()>>>;

/// A set of independent async locks addressed by key.
///
/// Slots are created on first use and dropped again once no holder or
/// waiter remains, so the map only grows with concurrently contended keys.
#[derive(Default)]
pub struct KeyLocks {
  slots: Mutex<Slots>,
}

/// Held lock for one key. Releases on drop.
pub struct KeyGuard<'a> {
  owner: &'a KeyLocks,
  key: String,
  guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock_slots(&self, op: &'static str) -> MutexGuard<'_, Slots> {
    match self.slots.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!(
          op,
          lock_kind = "mutex.lock",
          result = "poisoned_recovered",
          "Recovered from poisoned key lock table"
        );
        poisoned.into_inner()
      }
    }
  }

  fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
    self
      .lock_slots("slot")
      .entry(key.to_string())
      .or_default()
      .clone()
  }

  /// Wait until `key` is free and take it.
  pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
    let guard = self.slot(key).lock_owned().await;
    KeyGuard {
      owner: self,
      key: key.to_string(),
      guard: Some(guard),
    }
  }

  /// Take `key` only if nobody holds it.
  pub fn try_lock(&self, key: &str) -> Option<KeyGuard<'_>> {
    let guard = self.slot(key).try_lock_owned().ok()?;
    Some(KeyGuard {
      owner: self,
      key: key.to_string(),
      guard: Some(guard),
    })
  }

  /// Keys with a live slot.
  pub fn len(&self) -> usize {
    self.lock_slots("len").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Drop for KeyGuard<'_> {
  fn drop(&mut self) {
    self.guard.take();

    let mut slots = self.owner.lock_slots("release");
    // Only the table itself still references an idle slot
    if slots
      .get(&self.key)
      .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
      slots.remove(&self.key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_try_lock_excludes_second_holder() {
    let locks = KeyLocks::new();
    let held = locks.try_lock("a").unwrap();
    assert!(locks.try_lock("a").is_none());
    assert!(locks.try_lock("b").is_some());

    drop(held);
    assert!(locks.try_lock("a").is_some());
  }

  #[test]
  fn test_released_slots_are_dropped() {
    let locks = KeyLocks::new();
    {
      let _a = locks.try_lock("a").unwrap();
      let _b = locks.try_lock("b").unwrap();
      assert_eq!(locks.len(), 2);
    }
    assert!(locks.is_empty());
  }

  #[tokio::test]
  async fn test_lock_waits_for_holder() {
    let locks = Arc::new(KeyLocks::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = locks.lock("k").await;
    let waiter = {
      let locks = locks.clone();
      let order = order.clone();
      tokio::spawn(async move {
        let _guard = locks.lock("k").await;
        order.lock().unwrap().push("waiter");
      })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    order.lock().unwrap().push("holder");
    drop(held);
    waiter.await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["holder", "waiter"]);
    assert!(locks.is_empty());
  }
}
