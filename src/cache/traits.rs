//! Core types for the caching system.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A cached value together with the moment it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  /// Write time in epoch milliseconds
  pub timestamp: i64,
  pub data: T,
}

impl<T> CacheEntry<T> {
  pub fn new(timestamp: i64, data: T) -> Self {
    Self { timestamp, data }
  }
}

/// Kinds of cached resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  /// The agency's most recent subscription record
  AgencyPlan,
  /// Number of users attached to an agency
  UsersTotal,
  /// Platform-wide number of tnkers shown on the dashboard
  TnkersTotal,
  /// Platform-wide number of pro tnkers shown on the dashboard
  TnkersProTotal,
}

/// Storage key for a cached resource.
///
/// The literal layouts match what the browser dashboard wrote to local
/// storage, so an exported store stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(kind: ResourceKind, owner: &str) -> Self {
    let key = match kind {
      ResourceKind::AgencyPlan => format!("agencyPlan{}", owner),
      ResourceKind::UsersTotal => format!("{}usersTotal", owner),
      ResourceKind::TnkersTotal => "DashboardtnkersTotal".to_string(),
      ResourceKind::TnkersProTotal => "DashboardtnkersproTotal".to_string(),
    };
    Self(key)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Write time of the entry that now holds `data`, in epoch millis
  pub cached_at: i64,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T, cached_at: i64) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at,
    }
  }

  pub fn from_cache(entry: CacheEntry<T>) -> Self {
    Self {
      data: entry.data,
      source: CacheSource::Cache,
      cached_at: entry.timestamp,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the remote service and written to the cache
  Network,
  /// Served from a fresh cache entry
  Cache,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_agency_plan_key() {
    assert_eq!(CacheKey::new(ResourceKind::AgencyPlan, "u1").as_str(), "agencyPlanu1");
  }

  #[test]
  fn test_users_total_key_is_owner_prefixed() {
    assert_eq!(CacheKey::new(ResourceKind::UsersTotal, "abc").as_str(), "abcusersTotal");
  }

  #[test]
  fn test_global_keys_ignore_owner() {
    assert_eq!(
      CacheKey::new(ResourceKind::TnkersTotal, "abc"),
      CacheKey::new(ResourceKind::TnkersTotal, "xyz")
    );
    assert_eq!(
      CacheKey::new(ResourceKind::TnkersProTotal, "abc").to_string(),
      "DashboardtnkersproTotal"
    );
  }

  #[test]
  fn test_entry_wire_format() {
    let entry = CacheEntry::new(42, 7u64);
    let json = serde_json::to_string(&entry).unwrap();
    assert_eq!(json, r#"{"timestamp":42,"data":7}"#);
  }
}
