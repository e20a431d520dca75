//! Dashboard widgets backed by cached aggregate counts.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheKey, CacheLayer, CacheSource, ResourceKind};
use crate::remote::{DocumentService, Query};
use crate::session::UserSession;
use crate::subscription::types::USERS_COLLECTION;

/// A count as displayed on a dashboard card.
#[derive(Debug, Clone, PartialEq)]
pub struct CountView {
  pub value: u64,
  /// When the value was fetched, in epoch millis
  pub checked_at: i64,
  pub source: CacheSource,
}

/// "Total Users" card: users attached to the agency.
pub struct TotalUsers {
  service: Arc<dyn DocumentService>,
  cache: CacheLayer,
  ttl: Duration,
}

impl TotalUsers {
  pub fn new(service: Arc<dyn DocumentService>, cache: CacheLayer, ttl: Duration) -> Self {
    Self {
      service,
      cache,
      ttl,
    }
  }

  pub async fn load(&self, session: &UserSession) -> Result<CountView> {
    let key = CacheKey::new(ResourceKind::UsersTotal, &session.uid);
    let query = Query::collection(USERS_COLLECTION).where_eq("agency", session.uid.as_str());

    let result = self
      .cache
      .fetch_with_cache(&key, self.ttl, || self.service.count(&query))
      .await?;
    debug!(uid = %session.uid, value = result.data, source = ?result.source, "Total users");

    Ok(CountView {
      value: result.data,
      checked_at: result.cached_at,
      source: result.source,
    })
  }

  /// Drop every dashboard count and load this card again.
  pub async fn refresh(&self, session: &UserSession) -> Result<CountView> {
    self.cache.clear_cache(&refresh_keys(&session.uid))?;
    self.load(session).await
  }

  /// "last check" text for a view.
  pub fn last_check(&self, view: &CountView) -> String {
    format_since(view.checked_at, self.cache.clock().now_millis())
  }
}

/// Keys dropped by a manual refresh of the dashboard counts.
pub fn refresh_keys(uid: &str) -> Vec<CacheKey> {
  vec![
    CacheKey::new(ResourceKind::UsersTotal, uid),
    CacheKey::new(ResourceKind::TnkersTotal, uid),
    CacheKey::new(ResourceKind::TnkersProTotal, uid),
  ]
}

/// Human-readable time elapsed between two epoch-millis instants.
pub fn format_since(then: i64, now: i64) -> String {
  let seconds = now.saturating_sub(then).max(0) / 1000;
  let (amount, unit) = match seconds {
    s if s < 60 => return "just now".to_string(),
    s if s < 3600 => (s / 60, "minute"),
    s if s < 86_400 => (s / 3600, "hour"),
    s => (s / 86_400, "day"),
  };
  if amount == 1 {
    format!("1 {} ago", unit)
  } else {
    format!("{} {}s ago", amount, unit)
  }
}
