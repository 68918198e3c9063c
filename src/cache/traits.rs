//! Core types for the caching system: tiers, entries and write options.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Where a cache entry is kept besides the in-process map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageTier {
  /// In-process only, lost on restart
  #[default]
  Ephemeral,
  /// Persistent, cleared when its scope ends (logout, tab close)
  DurableA,
  /// Persistent until explicitly cleared
  DurableB,
}

impl StorageTier {
  /// Tiers that write through to a persistent backend.
  pub const DURABLE: [StorageTier; 2] = [StorageTier::DurableA, StorageTier::DurableB];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Ephemeral => "ephemeral",
      Self::DurableA => "durable-a",
      Self::DurableB => "durable-b",
    }
  }
}

impl fmt::Display for StorageTier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Options for a single `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
  pub ttl: Duration,
  pub tier: StorageTier,
}

impl SetOptions {
  pub fn new(ttl: Duration, tier: StorageTier) -> Self {
    Self { ttl, tier }
  }

  pub fn ephemeral(ttl: Duration) -> Self {
    Self::new(ttl, StorageTier::Ephemeral)
  }
}

/// A value with its freshness metadata.
///
/// This is also the wire format written to persistent tiers:
/// `{"value": ..., "timestamp": <ms>, "ttl": <ms>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub value: Value,
  /// Creation or last refresh, milliseconds since the epoch
  pub timestamp: i64,
  /// Milliseconds until the entry is stale
  pub ttl: u64,
}

impl CacheEntry {
  pub fn new(value: Value, timestamp: i64, ttl: Duration) -> Self {
    Self {
      value,
      timestamp,
      ttl: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
    }
  }

  /// An entry is expired once strictly more than `ttl` has elapsed.
  pub fn is_expired(&self, now_ms: i64) -> bool {
    i128::from(now_ms) - i128::from(self.timestamp) > i128::from(self.ttl)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_tier_serde_names() {
    assert_eq!(
      serde_json::to_string(&StorageTier::DurableA).unwrap(),
      "\"durable-a\""
    );
    let tier: StorageTier = serde_json::from_str("\"durable-b\"").unwrap();
    assert_eq!(tier, StorageTier::DurableB);
  }

  #[test]
  fn test_entry_expiry_boundary() {
    let entry = CacheEntry::new(json!(1), 10_000, Duration::from_millis(1_000));
    assert!(!entry.is_expired(10_000));
    assert!(!entry.is_expired(11_000));
    assert!(entry.is_expired(11_001));
  }

  #[test]
  fn test_entry_wire_format() {
    let entry = CacheEntry::new(json!({"a": 1}), 5, Duration::from_millis(7));
    let wire = serde_json::to_value(&entry).unwrap();
    assert_eq!(wire, json!({"value": {"a": 1}, "timestamp": 5, "ttl": 7}));
  }
}
