use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::cache::StorageTier;
use crate::pricing::PricingCatalog;
use crate::retry::RetryPolicy;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub pricing: PricingCatalog,
  #[serde(default)]
  pub content: ContentConfig,
  /// Used by calling layers around single remote calls
  #[serde(default)]
  pub retry: RetryPolicy,
  /// Write logs to a daily file here instead of stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// First component of every cache key
  pub namespace: String,
  pub session_ttl_ms: u64,
  pub session_tier: StorageTier,
  pub contribution_ttl_ms: u64,
  pub contribution_tier: StorageTier,
  /// When false, durable tiers discard writes
  pub persist: bool,
  /// SQLite file for durable tiers (default: $XDG_DATA_HOME/tribute/cache.db)
  pub database_path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      namespace: "tribute".to_string(),
      session_ttl_ms: 7 * DAY_MS,
      session_tier: StorageTier::DurableB,
      contribution_ttl_ms: 30 * DAY_MS,
      contribution_tier: StorageTier::DurableB,
      persist: true,
      database_path: None,
    }
  }
}

impl CacheConfig {
  pub fn session_ttl(&self) -> Duration {
    Duration::from_millis(self.session_ttl_ms)
  }

  pub fn contribution_ttl(&self) -> Duration {
    Duration::from_millis(self.contribution_ttl_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
  /// Base URL of the backend content API
  pub base_url: Option<String>,
  pub timeout_ms: u64,
}

impl Default for ContentConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_ms: 10_000,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tribute.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tribute/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        debug!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tribute.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tribute").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the content service API token from environment variables.
  ///
  /// Checks TRIBUTE_API_TOKEN first, then CONTENT_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("TRIBUTE_API_TOKEN")
      .or_else(|_| std::env::var("CONTENT_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Content API token not found. Set TRIBUTE_API_TOKEN or CONTENT_API_TOKEN."
        )
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.cache.namespace, "tribute");
    assert_eq!(config.cache.session_ttl(), Duration::from_secs(7 * 24 * 60 * 60));
    assert_eq!(config.cache.session_tier, StorageTier::DurableB);
    assert!(config.cache.persist);
    assert_eq!(config.pricing.base_price("solo"), Some(399));
    assert_eq!(config.retry, RetryPolicy::default());
  }

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.cache.session_ttl_ms, 7 * DAY_MS);
    assert!(config.content.base_url.is_none());
  }

  #[test]
  fn test_partial_sections_merge_with_defaults() {
    let config = Config::from_yaml(
      r#"
cache:
  namespace: memorial
  session_tier: durable-a
pricing:
  extra_location_rate: 75
  packages:
    solo:
      base_price: 449
      description: Solo
content:
  base_url: https://api.example.com
retry:
  max_attempts: 8
log_dir: /var/log/tribute
"#,
    )
    .unwrap();

    assert_eq!(config.cache.namespace, "memorial");
    assert_eq!(config.cache.session_tier, StorageTier::DurableA);
    assert_eq!(config.cache.session_ttl_ms, 7 * DAY_MS);
    assert_eq!(config.pricing.base_price("solo"), Some(449));
    assert_eq!(config.pricing.base_price("legacy"), None);
    assert_eq!(config.pricing.extra_location_rate, 75);
    assert_eq!(config.pricing.extra_hour_rate, 100);
    assert_eq!(config.content.timeout_ms, 10_000);
    assert_eq!(config.retry.max_attempts, 8);
    assert_eq!(config.retry.base_delay_ms, 200);
    assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/tribute")));
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/tribute.yaml"))).is_err());
  }

  #[test]
  fn test_load_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tribute.yaml");
    std::fs::write(&path, "cache:\n  persist: false\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert!(!config.cache.persist);
  }

  #[test]
  fn test_invalid_tier_is_rejected() {
    assert!(Config::from_yaml("cache:\n  session_tier: cookie\n").is_err());
  }
}
