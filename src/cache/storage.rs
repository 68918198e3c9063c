//! Persistent tier backends: trait plus in-memory, SQLite and no-op stores.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::StorageTier;

/// A string key-value store backing one persistent tier.
///
/// Values are the serialized entry envelopes; the cache owns
/// (de)serialization and expiry, backends only move strings.
pub trait TierStorage: Send + Sync {
  fn read(&self, key: &str) -> Result<Option<String>>;

  fn write(&self, key: &str, data: &str) -> Result<()>;

  /// Remove a key. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// All stored keys starting with `prefix`, in ascending order.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

  /// Drop every key in this tier.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl TierStorage for NoopStorage {
  fn read(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn write(&self, _key: &str, _data: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// In-memory store with an optional byte quota.
///
/// Shared through an `Arc`, it stands in for a profile-wide store that
/// several cache instances see.
#[derive(Default)]
pub struct MemoryStorage {
  data: Mutex<BTreeMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes that would push the total size of keys and values past
  /// `quota_bytes`.
  pub fn with_quota(quota_bytes: usize) -> Self {
    Self {
      data: Mutex::new(BTreeMap::new()),
      quota_bytes: Some(quota_bytes),
    }
  }

  pub fn len(&self) -> usize {
    self.data.lock().map(|d| d.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
    self.data.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl TierStorage for MemoryStorage {
  fn read(&self, key: &str) -> Result<Option<String>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn write(&self, key: &str, data: &str) -> Result<()> {
    let mut map = self.lock()?;

    if let Some(quota) = self.quota_bytes {
      let used: usize = map
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      let needed = used + key.len() + data.len();
      if needed > quota {
        return Err(eyre!(
          "Storage quota exceeded writing {}: {} of {} bytes",
          key,
          needed,
          quota
        ));
      }
    }

    map.insert(key.to_string(), data.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    Ok(
      self
        .lock()?
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect(),
    )
  }

  fn clear(&self) -> Result<()> {
    self.lock()?.clear();
    Ok(())
  }
}

/// SQLite-based tier storage. Each durable tier gets its own table in the
/// same database file.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  table: &'static str,
}

impl SqliteStorage {
  /// Open the store for `tier` at the default location.
  pub fn open(tier: StorageTier) -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path, tier)
  }

  /// Open the store for `tier` in the database at `path`.
  pub fn open_at(path: &Path, tier: StorageTier) -> Result<Self> {
    let table = Self::table_for(tier)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
      table,
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tribute").join("cache.db"))
  }

  fn table_for(tier: StorageTier) -> Result<&'static str> {
    match tier {
      StorageTier::DurableA => Ok("scoped_entries"),
      StorageTier::DurableB => Ok("persistent_entries"),
      StorageTier::Ephemeral => Err(eyre!("The ephemeral tier has no persistent storage")),
    }
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Entries scoped to a login/tab lifetime (durable-a)
CREATE TABLE IF NOT EXISTS scoped_entries (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Entries kept until explicitly cleared (durable-b)
CREATE TABLE IF NOT EXISTS persistent_entries (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl TierStorage for SqliteStorage {
  fn read(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn()?;
    let sql = format!("SELECT data FROM {} WHERE key = ?", self.table);

    conn
      .query_row(&sql, params![key], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn write(&self, key: &str, data: &str) -> Result<()> {
    let conn = self.conn()?;
    let sql = format!(
      "INSERT OR REPLACE INTO {} (key, data, written_at) VALUES (?, ?, datetime('now'))",
      self.table
    );

    conn
      .execute(&sql, params![key, data])
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.conn()?;
    let sql = format!("DELETE FROM {} WHERE key = ?", self.table);

    conn
      .execute(&sql, params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;

    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let sql = format!(
      "SELECT key FROM {} WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
      self.table
    );

    let mut stmt = conn
      .prepare(&sql)
      .map_err(|e| eyre!("Failed to prepare key scan: {}", e))?;

    let keys = stmt
      .query_map(params![prefix], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to scan keys: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn clear(&self) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(&format!("DELETE FROM {}", self.table), [])
      .map_err(|e| eyre!("Failed to clear {}: {}", self.table, e))?;
    Ok(())
  }
}
