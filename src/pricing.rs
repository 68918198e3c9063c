//! Livestream package catalog and price computation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// One priced offering in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOffering {
  pub base_price: u64,
  pub description: String,
}

/// Static pricing table. The core reads it but does not own or validate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingCatalog {
  #[serde(default = "default_packages")]
  pub packages: BTreeMap<String, PackageOffering>,
  /// Charged for every livestream hour past the first
  #[serde(default = "default_extra_hour_rate")]
  pub extra_hour_rate: u64,
  /// Charged for every location past the first
  #[serde(default = "default_extra_location_rate")]
  pub extra_location_rate: u64,
}

fn default_packages() -> BTreeMap<String, PackageOffering> {
  [
    ("solo", 399, "Single-location livestream"),
    ("anywhere", 1299, "Livestream with on-site videographer"),
    ("legacy", 2999, "Multi-camera livestream with recording and edit"),
  ]
  .into_iter()
  .map(|(id, base_price, description)| {
    (
      id.to_string(),
      PackageOffering {
        base_price,
        description: description.to_string(),
      },
    )
  })
  .collect()
}

fn default_extra_hour_rate() -> u64 {
  100
}

fn default_extra_location_rate() -> u64 {
  50
}

impl Default for PricingCatalog {
  fn default() -> Self {
    Self {
      packages: default_packages(),
      extra_hour_rate: default_extra_hour_rate(),
      extra_location_rate: default_extra_location_rate(),
    }
  }
}

/// Itemized price for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
  pub base: u64,
  pub extra_hours_cost: u64,
  pub extra_locations_cost: u64,
  pub total: u64,
}

impl PricingCatalog {
  pub fn base_price(&self, package: &str) -> Option<u64> {
    self.packages.get(package).map(|p| p.base_price)
  }

  /// Price a configuration. Pure: the same inputs always give the same
  /// breakdown.
  ///
  /// A missing or unknown package contributes a base price of zero.
  pub fn quote(
    &self,
    package: Option<&str>,
    duration_hours: u32,
    location_count: usize,
  ) -> PriceBreakdown {
    let base = match package {
      Some(id) => self.base_price(id).unwrap_or_else(|| {
        warn!(package = id, "Unknown package, pricing base at zero");
        0
      }),
      None => 0,
    };

    let extra_hours = u64::from(duration_hours.saturating_sub(1));
    let extra_locations = u64::try_from(location_count.saturating_sub(1)).unwrap_or(u64::MAX);

    let extra_hours_cost = extra_hours.saturating_mul(self.extra_hour_rate);
    let extra_locations_cost = extra_locations.saturating_mul(self.extra_location_rate);

    PriceBreakdown {
      base,
      extra_hours_cost,
      extra_locations_cost,
      total: base
        .saturating_add(extra_hours_cost)
        .saturating_add(extra_locations_cost),
    }
  }
}
