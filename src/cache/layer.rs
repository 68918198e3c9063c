//! Tiered cache that keeps every entry in process and writes through to a
//! persistent tier on request.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::storage::{NoopStorage, TierStorage};
use super::traits::{CacheEntry, SetOptions, StorageTier};

/// An in-process entry and the tier it was written to.
#[derive(Debug, Clone)]
struct MemoryEntry {
  entry: CacheEntry,
  tier: StorageTier,
}

/// Generic key-value cache with per-entry TTL.
///
/// Every `set` lands in the in-process map. Entries written to a durable
/// tier are also serialized to that tier's backend, so a fresh process can
/// still find them. Persistence is best effort: a backend failure is logged
/// and the in-process value stays available.
///
/// Two cache instances over the same durable backends do not coordinate.
/// The last write to reach a backend wins for any process that later loads
/// the key from it.
pub struct TieredCache {
  entries: Mutex<HashMap<String, MemoryEntry>>,
  scoped: Arc<dyn TierStorage>,
  persistent: Arc<dyn TierStorage>,
  clock: Arc<dyn Clock>,
}

impl TieredCache {
  /// Create a cache over the given durable-a and durable-b backends.
  pub fn new(scoped: Arc<dyn TierStorage>, persistent: Arc<dyn TierStorage>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      scoped,
      persistent,
      clock: Arc::new(SystemClock),
    }
  }

  /// Create a cache whose durable tiers discard everything.
  pub fn in_process() -> Self {
    Self::new(Arc::new(NoopStorage), Arc::new(NoopStorage))
  }

  /// Replace the time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Current time according to the cache's clock.
  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  fn backend(&self, tier: StorageTier) -> Option<&dyn TierStorage> {
    match tier {
      StorageTier::Ephemeral => None,
      StorageTier::DurableA => Some(self.scoped.as_ref()),
      StorageTier::DurableB => Some(self.persistent.as_ref()),
    }
  }

  fn lock_entries(&self, op: &'static str) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
    match self.entries.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!(
          op,
          lock_kind = "mutex.lock",
          result = "poisoned_recovered",
          "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
      }
    }
  }

  /// Store `value` under `key`, replacing any previous entry and resetting
  /// its timestamp. Returns the stored value.
  ///
  /// The in-process lock is held across the durable write, so concurrent
  /// writers leave the map and the backend agreeing on the last value.
  pub fn set(&self, key: &str, value: Value, options: SetOptions) -> Value {
    let mut entries = self.lock_entries("set");
    let entry = CacheEntry::new(value, self.clock.now_ms(), options.ttl);

    for tier in StorageTier::DURABLE {
      let Some(backend) = self.backend(tier) else {
        continue;
      };

      if tier == options.tier {
        match serde_json::to_string(&entry) {
          Ok(data) => {
            if let Err(e) = backend.write(key, &data) {
              warn!(key, tier = %tier, error = %e, "Failed to persist cache entry");
            }
          }
          Err(e) => {
            warn!(key, tier = %tier, error = %e, "Failed to serialize cache entry");
          }
        }
      } else if let Err(e) = backend.remove(key) {
        // A copy left in another tier would shadow nothing in process but
        // could resurface after a restart.
        warn!(key, tier = %tier, error = %e, "Failed to drop superseded cache entry");
      }
    }

    let value = entry.value.clone();
    entries.insert(
      key.to_string(),
      MemoryEntry {
        entry,
        tier: options.tier,
      },
    );
    value
  }

  /// Look up a fresh value. Expired entries are purged from every tier and
  /// reported as absent.
  pub fn get(&self, key: &str) -> Option<Value> {
    self.lookup(key).map(|entry| entry.value)
  }

  /// Whether a fresh entry exists, with the same expiry semantics as `get`.
  pub fn has(&self, key: &str) -> bool {
    self.lookup(key).is_some()
  }

  /// Remove `key` from every tier. Removing a missing key is a no-op.
  pub fn delete(&self, key: &str) {
    let mut entries = self.lock_entries("delete");
    entries.remove(key);
    self.purge_durable(key);
  }

  /// The expiry check and the purge happen under one lock, so a concurrent
  /// `set` is never removed by a purge meant for the entry it replaced.
  fn lookup(&self, key: &str) -> Option<CacheEntry> {
    let mut entries = self.lock_entries("get");
    let now = self.clock.now_ms();

    if let Some(found) = entries.get(key) {
      if !found.entry.is_expired(now) {
        return Some(found.entry.clone());
      }
      debug!(key, tier = %found.tier, "Cache entry expired");
      entries.remove(key);
      self.purge_durable(key);
      return None;
    }

    // Not in process: an earlier process may have persisted it
    for tier in StorageTier::DURABLE {
      let Some(backend) = self.backend(tier) else {
        continue;
      };

      let data = match backend.read(key) {
        Ok(Some(data)) => data,
        Ok(None) => continue,
        Err(e) => {
          warn!(key, tier = %tier, error = %e, "Failed to read persisted cache entry");
          continue;
        }
      };

      let entry: CacheEntry = match serde_json::from_str(&data) {
        Ok(entry) => entry,
        Err(e) => {
          warn!(key, tier = %tier, error = %e, "Discarding unreadable cache entry");
          if let Err(e) = backend.remove(key) {
            warn!(key, tier = %tier, error = %e, "Failed to remove unreadable cache entry");
          }
          continue;
        }
      };

      if entry.is_expired(now) {
        debug!(key, tier = %tier, "Persisted cache entry expired");
        self.purge_durable(key);
        return None;
      }

      entries.insert(
        key.to_string(),
        MemoryEntry {
          entry: entry.clone(),
          tier,
        },
      );
      return Some(entry);
    }

    None
  }

  fn purge_durable(&self, key: &str) {
    for tier in StorageTier::DURABLE {
      if let Some(backend) = self.backend(tier) {
        if let Err(e) = backend.remove(key) {
          warn!(key, tier = %tier, error = %e, "Failed to remove persisted cache entry");
        }
      }
    }
  }

  /// Keys starting with `prefix` across all tiers, sorted and deduplicated.
  ///
  /// Keys are not checked for freshness here; read them with `get`.
  pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
    let mut keys: BTreeSet<String> = self
      .lock_entries("keys")
      .keys()
      .filter(|k| k.starts_with(prefix))
      .cloned()
      .collect();

    for tier in StorageTier::DURABLE {
      let Some(backend) = self.backend(tier) else {
        continue;
      };
      match backend.keys_with_prefix(prefix) {
        Ok(found) => keys.extend(found),
        Err(e) => warn!(prefix, tier = %tier, error = %e, "Failed to scan persisted keys"),
      }
    }

    keys.into_iter().collect()
  }

  /// Drop everything written to `tier`, ending its lifetime scope.
  pub fn clear_tier(&self, tier: StorageTier) {
    let mut entries = self.lock_entries("clear_tier");
    entries.retain(|_, entry| entry.tier != tier);

    if let Some(backend) = self.backend(tier) {
      if let Err(e) = backend.clear() {
        warn!(tier = %tier, error = %e, "Failed to clear cache tier");
      }
    }
  }

  /// Serialize `value` and store it. Fails only if the value cannot be
  /// represented as JSON.
  pub fn set_json<T: Serialize>(
    &self,
    key: &str,
    value: &T,
    options: SetOptions,
  ) -> Result<Value, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(self.set(key, value, options))
  }

  /// Look up a fresh value and decode it. A stored value of the wrong shape
  /// is an error, distinct from absence.
  pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
    self.get(key).map(serde_json::from_value).transpose()
  }
}
