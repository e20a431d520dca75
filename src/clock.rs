//! Wall-clock abstraction so cache expiry and plan end dates can be tested
//! at exact boundaries.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  /// Current time in epoch milliseconds, the unit cache entries are stamped with.
  fn now_millis(&self) -> i64 {
    self.now().timestamp_millis()
  }
}

/// Clock backed by the system time
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
  now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
  pub fn new(now: DateTime<Utc>) -> Self {
    Self {
      now: std::sync::Mutex::new(now),
    }
  }

  pub fn at_millis(millis: i64) -> Self {
    Self::new(Utc.timestamp_millis_opt(millis).single().unwrap_or_default())
  }

  pub fn advance(&self, by: chrono::Duration) {
    if let Ok(mut now) = self.now.lock() {
      *now += by;
    }
  }

  pub fn set(&self, to: DateTime<Utc>) {
    if let Ok(mut now) = self.now.lock() {
      *now = to;
    }
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
  }
}

/// Read a stored timestamp.
///
/// Accepts RFC 3339 text, the `{seconds, nanoseconds}` shape of exported
/// Firestore timestamps (underscore-prefixed keys too) and epoch millis.
pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
  match value {
    Value::String(s) => DateTime::parse_from_rfc3339(s)
      .ok()
      .map(|dt| dt.with_timezone(&Utc)),
    Value::Number(n) => n
      .as_i64()
      .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
    Value::Object(map) => {
      let seconds = map.get("seconds").or_else(|| map.get("_seconds"))?.as_i64()?;
      let nanos = match map.get("nanoseconds").or_else(|| map.get("_nanoseconds")) {
        Some(n) => u32::try_from(n.as_u64()?).ok()?,
        None => 0,
      };
      Utc.timestamp_opt(seconds, nanos).single()
    }
    _ => None,
  }
}
