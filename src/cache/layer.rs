//! Cache layer that orchestrates TTL checks with remote fetching.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::storage::KeyValueStore;
use super::traits::{CacheEntry, CacheKey, CacheResult};
use crate::clock::Clock;

/// Staleness test: an entry written at `timestamp` is expired at `now` when
/// strictly more than `ttl` has elapsed.
pub fn is_expired_at(timestamp: i64, ttl: Duration, now: i64) -> bool {
  let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
  now.saturating_sub(timestamp) > ttl_millis
}

/// Cache layer that manages TTL checks and network fetching.
///
/// Sits between page logic and the remote service. The TTL is chosen per
/// call since each resource changes at its own pace.
pub struct CacheLayer {
  storage: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
}

impl CacheLayer {
  pub fn new(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self { storage, clock }
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  /// Check if an entry is older than `ttl`.
  pub fn is_expired<T>(&self, entry: &CacheEntry<T>, ttl: Duration) -> bool {
    is_expired_at(entry.timestamp, ttl, self.clock.now_millis())
  }

  /// Read the raw entry under `key`.
  ///
  /// A value that no longer parses is treated as absent so the caller
  /// falls through to the network.
  pub fn read_entry<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<CacheEntry<T>>> {
    let raw = match self.storage.get(key.as_str())? {
      Some(raw) => raw,
      None => return Ok(None),
    };

    match serde_json::from_str::<CacheEntry<T>>(&raw) {
      Ok(entry) => Ok(Some(entry)),
      Err(e) => {
        warn!(key = %key, error = %e, "Discarding unreadable cache entry");
        Ok(None)
      }
    }
  }

  /// Read the entry under `key` if it exists and is within `ttl`.
  pub fn read_fresh<T: DeserializeOwned>(
    &self,
    key: &CacheKey,
    ttl: Duration,
  ) -> Result<Option<CacheEntry<T>>> {
    Ok(
      self
        .read_entry(key)?
        .filter(|entry: &CacheEntry<T>| !self.is_expired(entry, ttl)),
    )
  }

  /// Stamp `data` with the current time and store it under `key`.
  ///
  /// Returns the timestamp written.
  pub fn write_entry<T: Serialize>(&self, key: &CacheKey, data: &T) -> Result<i64> {
    let timestamp = self.clock.now_millis();
    let raw = serde_json::to_string(&CacheEntry::new(timestamp, data))
      .map_err(|e| eyre!("Failed to serialize cache entry {}: {}", key, e))?;
    self.storage.set(key.as_str(), &raw)?;
    Ok(timestamp)
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if present and within `ttl`, return it
  /// 2. Otherwise run the fetcher and store its result
  ///
  /// Fetch errors propagate; a stale entry is never served in their place.
  pub async fn fetch_with_cache<T, F, Fut>(
    &self,
    key: &CacheKey,
    ttl: Duration,
    fetcher: F,
  ) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if let Some(entry) = self.read_fresh::<T>(key, ttl)? {
      debug!(key = %key, "Cache hit");
      return Ok(CacheResult::from_cache(entry));
    }

    debug!(key = %key, "Cache miss, fetching");
    let data = fetcher().await?;
    let cached_at = self.write_entry(key, &data)?;
    Ok(CacheResult::from_network(data, cached_at))
  }

  /// Remove every listed entry so the next read goes to the network.
  pub fn clear_cache(&self, keys: &[CacheKey]) -> Result<()> {
    for key in keys {
      self.storage.remove(key.as_str())?;
    }
    debug!(count = keys.len(), "Cleared cache entries");
    Ok(())
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
    }
  }
}
