//! Subscription, plan and coupon records as stored in the document database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection holding an agency's subscriptions.
pub fn subscriptions_collection(uid: &str) -> String {
  format!("agencies/{}/subscriptions", uid)
}

pub const PLANS_COLLECTION: &str = "plans";
pub const USERS_COLLECTION: &str = "users";

pub fn coupon_path(code: &str) -> String {
  format!("coupons/{}", code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
  Active,
  Pending,
  Expired,
}

impl SubscriptionStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Active => "Active",
      Self::Pending => "Pending",
      Self::Expired => "Expired",
    }
  }
}

/// Named feature group listed on a plan card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
  #[serde(rename = "featureName")]
  pub name: String,
  #[serde(default)]
  pub descriptions: Vec<String>,
}

/// One subscription of an agency to a plan.
///
/// The remote service owns these; the client keeps read copies and may ask
/// for the Active -> Expired transition once `end_date` has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
  pub id: String,
  pub status: SubscriptionStatus,
  #[serde(rename = "plan", default)]
  pub plan_id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agency: Option<String>,
  #[serde(rename = "maxClients", default)]
  pub max_clients: Option<u32>,
  #[serde(rename = "maxStaff", default)]
  pub max_staff: Option<u32>,
  #[serde(default)]
  pub features: Vec<Feature>,
  /// Subscription length in months
  #[serde(rename = "periode", default)]
  pub period_months: Option<u32>,
  #[serde(default)]
  pub price: Option<f64>,
  /// Coupon discount in percent, if one was applied
  #[serde(default)]
  pub coupon: Option<f64>,
  #[serde(rename = "created_at", default, with = "timestamp_opt")]
  pub created_at: Option<DateTime<Utc>>,
  /// Set by the backend when the subscription is activated
  #[serde(rename = "endDate", default, with = "timestamp_opt")]
  pub end_date: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
  /// Whether the paid period is over. Records without an end date never end.
  pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
    self.end_date.is_some_and(|end| now > end)
  }

  pub fn with_status(&self, status: SubscriptionStatus) -> Self {
    Self {
      status,
      ..self.clone()
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDuration {
  /// Length in months
  pub duration: u32,
  pub price: f64,
}

/// A plan offered on the plan-selection page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub id: String,
  pub name: String,
  #[serde(rename = "maxClients", default)]
  pub max_clients: Option<u32>,
  #[serde(rename = "maxStaff", default)]
  pub max_staff: Option<u32>,
  #[serde(default)]
  pub features: Vec<Feature>,
  #[serde(default)]
  pub durations: Vec<PlanDuration>,
  #[serde(rename = "showInRegistration", default)]
  pub show_in_registration: bool,
}

/// Discount coupon, stored under `coupons/<code>`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Coupon {
  pub id: String,
  /// Owning agency; empty or absent means anyone may use it
  #[serde(rename = "agencyId", default)]
  pub agency_id: Option<String>,
  #[serde(rename = "expirationDate", default, with = "timestamp_opt")]
  pub expiration_date: Option<DateTime<Utc>>,
  /// Discount in percent
  #[serde(default)]
  pub solde: f64,
}

/// Timestamps are written as RFC 3339 strings and read in any shape
/// [`timestamp_from_value`](crate::clock::timestamp_from_value) accepts.
mod timestamp_opt {
  use chrono::{DateTime, Utc};
  use serde::{de, Deserialize, Deserializer, Serializer};
  use serde_json::Value;

  use crate::clock::timestamp_from_value;

  pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
    match value {
      Some(dt) => s.serialize_some(&dt.to_rfc3339()),
      None => s.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<Value>::deserialize(d)? {
      None | Some(Value::Null) => Ok(None),
      Some(value) => timestamp_from_value(&value)
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("invalid timestamp {}", value))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  #[test]
  fn test_record_from_document_fields() {
    let record: SubscriptionRecord = serde_json::from_value(json!({
      "id": "s1",
      "agency": "u1",
      "plan": "gold",
      "name": "Gold",
      "maxClients": 50,
      "maxStaff": 5,
      "features": [{"featureName": "Reports", "descriptions": ["CSV export"]}],
      "periode": 3,
      "status": "Active",
      "price": 120.0,
      "coupon": null,
      "created_at": "2024-01-01T10:00:00Z",
      "endDate": "2024-04-01T10:00:00Z"
    }))
    .unwrap();

    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.plan_id, "gold");
    assert_eq!(record.period_months, Some(3));
    assert_eq!(record.features[0].descriptions, vec!["CSV export"]);
    assert_eq!(
      record.end_date,
      Some(Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap())
    );
  }

  #[test]
  fn test_exported_timestamp_shape() {
    let record: SubscriptionRecord = serde_json::from_value(json!({
      "id": "s1",
      "status": "Active",
      "endDate": {"seconds": 1_700_000_000, "nanoseconds": 500_000_000}
    }))
    .unwrap();
    let end = record.end_date.unwrap();
    assert_eq!(end.timestamp(), 1_700_000_000);
    assert_eq!(end.timestamp_subsec_millis(), 500);
  }

  #[test]
  fn test_has_ended_is_strict() {
    let end = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let record: SubscriptionRecord = serde_json::from_value(json!({
      "id": "s1", "status": "Active", "endDate": end.to_rfc3339()
    }))
    .unwrap();

    assert!(!record.has_ended(end));
    assert!(record.has_ended(end + chrono::Duration::seconds(1)));
  }

  #[test]
  fn test_record_without_end_date_never_ends() {
    let record: SubscriptionRecord =
      serde_json::from_value(json!({"id": "s1", "status": "Active"})).unwrap();
    assert!(!record.has_ended(Utc::now()));
  }

  #[test]
  fn test_serialized_status_is_capitalized() {
    let record: SubscriptionRecord =
      serde_json::from_value(json!({"id": "s1", "status": "Pending"})).unwrap();
    let value = serde_json::to_value(record.with_status(SubscriptionStatus::Expired)).unwrap();
    assert_eq!(value["status"], "Expired");
    assert_eq!(value["endDate"], serde_json::Value::Null);
  }
}
