//! Checkout session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a checkout session.
///
/// `Pending -> Saved -> Completed`, or `Pending -> Completed` directly.
/// `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
  Pending,
  Saved,
  Completed,
}

impl CheckoutStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Saved => "saved",
      Self::Completed => "completed",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed)
  }
}

impl fmt::Display for CheckoutStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A venue streamed during the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
  pub name: String,
  pub address: String,
  pub start_time: String,
  /// Hours
  pub duration: u32,
}

/// Billing summary attached on completion. Never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
  pub billing_name: String,
  pub billing_address: String,
  pub card_last4: String,
}

/// One user's in-progress or completed purchase configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
  pub id: String,
  #[serde(default)]
  pub customer_name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub phone_number: String,
  #[serde(default)]
  pub livestream_date: String,
  #[serde(default)]
  pub livestream_time: String,
  /// Hours
  pub livestream_duration: u32,
  pub selected_package: Option<String>,
  #[serde(default)]
  pub locations: Vec<Location>,
  pub total_cost: u64,
  pub saved_at: DateTime<Utc>,
  pub checkout_status: CheckoutStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub payment_details: Option<PaymentDetails>,
}

impl CheckoutSession {
  /// An empty pending session.
  pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self {
      id: id.into(),
      customer_name: String::new(),
      email: String::new(),
      phone_number: String::new(),
      livestream_date: String::new(),
      livestream_time: String::new(),
      livestream_duration: 1,
      selected_package: None,
      locations: Vec::new(),
      total_cost: 0,
      saved_at: now,
      checkout_status: CheckoutStatus::Pending,
      payment_details: None,
    }
  }

  /// Overwrite every field the patch carries.
  pub fn apply(&mut self, patch: SessionPatch) {
    let SessionPatch {
      customer_name,
      email,
      phone_number,
      livestream_date,
      livestream_time,
      livestream_duration,
      selected_package,
      locations,
      save: _,
    } = patch;

    if let Some(v) = customer_name {
      self.customer_name = v;
    }
    if let Some(v) = email {
      self.email = v;
    }
    if let Some(v) = phone_number {
      self.phone_number = v;
    }
    if let Some(v) = livestream_date {
      self.livestream_date = v;
    }
    if let Some(v) = livestream_time {
      self.livestream_time = v;
    }
    if let Some(v) = livestream_duration {
      self.livestream_duration = v;
    }
    if let Some(v) = selected_package {
      self.selected_package = Some(v);
    }
    if let Some(v) = locations {
      self.locations = v;
    }
  }
}

/// Partial edit merged into a session by `create_or_update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionPatch {
  pub customer_name: Option<String>,
  pub email: Option<String>,
  pub phone_number: Option<String>,
  pub livestream_date: Option<String>,
  pub livestream_time: Option<String>,
  pub livestream_duration: Option<u32>,
  pub selected_package: Option<String>,
  pub locations: Option<Vec<Location>>,
  /// Store under `saved` instead of `pending`
  pub save: bool,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn now() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_704_067_200_000).unwrap()
  }

  #[test]
  fn test_apply_only_overwrites_present_fields() {
    let mut session = CheckoutSession::new("s1", now());
    session.customer_name = "Ada".to_string();

    session.apply(SessionPatch {
      email: Some("ada@example.com".to_string()),
      livestream_duration: Some(3),
      ..Default::default()
    });

    assert_eq!(session.customer_name, "Ada");
    assert_eq!(session.email, "ada@example.com");
    assert_eq!(session.livestream_duration, 3);
  }

  #[test]
  fn test_serialized_field_names() {
    let mut session = CheckoutSession::new("s1", now());
    session.payment_details = Some(PaymentDetails {
      billing_name: "Ada".to_string(),
      billing_address: "1 Main St".to_string(),
      card_last4: "4242".to_string(),
    });
    session.checkout_status = CheckoutStatus::Completed;

    let value = serde_json::to_value(&session).unwrap();
    assert_eq!(value["checkoutStatus"], json!("completed"));
    assert_eq!(value["paymentDetails"]["cardLast4"], json!("4242"));
    assert_eq!(value["livestreamDuration"], json!(1));
    assert!(value.get("totalCost").is_some());
  }

  #[test]
  fn test_payment_details_omitted_until_completed() {
    let session = CheckoutSession::new("s1", now());
    let value = serde_json::to_value(&session).unwrap();
    assert!(value.get("paymentDetails").is_none());
  }

  #[test]
  fn test_patch_deserializes_partial_json() {
    let patch: SessionPatch =
      serde_json::from_value(json!({"selectedPackage": "solo", "save": true})).unwrap();
    assert_eq!(patch.selected_package.as_deref(), Some("solo"));
    assert!(patch.save);
    assert!(patch.locations.is_none());
  }
}
