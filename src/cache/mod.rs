//! Generic tiered cache with per-entry expiry.
//!
//! This module provides a domain-agnostic key-value cache that:
//! - Keeps every entry in an in-process map
//! - Writes through to one of two persistent tiers when asked
//! - Treats entries older than their TTL as absent and purges them on read
//! - Never fails a write because persistence failed
//!
//! [`KeyLocks`] serializes callers that read, await, then write one key.

mod clock;
mod layer;
mod locks;
mod storage;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use layer::TieredCache;
pub use locks::{KeyGuard, KeyLocks};
pub use storage::{MemoryStorage, NoopStorage, SqliteStorage, TierStorage};
pub use traits::{CacheEntry, SetOptions, StorageTier};
