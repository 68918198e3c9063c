//! Checkout and contribution core for the memorial tribute service.
//!
//! A [`TieredCache`](cache::TieredCache) with per-entry expiry sits at the
//! bottom. Checkout sessions, their resume flow and contribution requests are
//! stored through it under keys from [`keys`], and hand finished records to a
//! [`ContentService`](content::ContentService).

pub mod cache;
pub mod checkout;
pub mod config;
pub mod content;
pub mod contribution;
pub mod keys;
pub mod logging;
pub mod pricing;
pub mod retry;

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use cache::{NoopStorage, SqliteStorage, StorageTier, TierStorage, TieredCache};
use checkout::{CheckoutStore, ResumeController, SessionSettings};
use config::Config;
use content::{ContentService, HttpContentClient};
use contribution::ContributionWorkflow;

/// The assembled core: one cache shared by every component.
pub struct TributeCore {
  pub cache: Arc<TieredCache>,
  pub checkout: Arc<CheckoutStore>,
  pub resume: ResumeController,
  pub contributions: ContributionWorkflow,
}

impl TributeCore {
  /// Open the durable tiers and content client described by `config`.
  pub fn open(config: &Config) -> Result<Self> {
    let scoped: Arc<dyn TierStorage>;
    let persistent: Arc<dyn TierStorage>;
    if config.cache.persist {
      let path = match &config.cache.database_path {
        Some(path) => path.clone(),
        None => SqliteStorage::default_path()?,
      };
      info!(path = %path.display(), "Opening durable cache tiers");
      scoped = Arc::new(SqliteStorage::open_at(&path, StorageTier::DurableA)?);
      persistent = Arc::new(SqliteStorage::open_at(&path, StorageTier::DurableB)?);
    } else {
      info!("Durable cache tiers disabled");
      scoped = Arc::new(NoopStorage);
      persistent = Arc::new(NoopStorage);
    }

    let cache = Arc::new(TieredCache::new(scoped, persistent));
    let content = Arc::new(HttpContentClient::new(&config.content)?);
    Ok(Self::with_parts(config, cache, content))
  }

  /// Assemble the core from an existing cache and content service.
  pub fn with_parts(
    config: &Config,
    cache: Arc<TieredCache>,
    content: Arc<dyn ContentService>,
  ) -> Self {
    let checkout = Arc::new(CheckoutStore::new(
      cache.clone(),
      Arc::new(config.pricing.clone()),
      content.clone(),
      SessionSettings {
        namespace: config.cache.namespace.clone(),
        ttl: config.cache.session_ttl(),
        tier: config.cache.session_tier,
      },
    ));

    let contributions = ContributionWorkflow::new(
      cache.clone(),
      content,
      config.cache.namespace.clone(),
      config.cache.contribution_ttl(),
      config.cache.contribution_tier,
    );

    Self {
      resume: ResumeController::new(checkout.clone()),
      cache,
      checkout,
      contributions,
    }
  }
}
