//! Subscription gate: decides whether an agency may enter a protected page.
//!
//! Evaluation order:
//! 1. No session -> login
//! 2. Fresh cached plan (1 hour by default) -> admit, or expire it if its end
//!    date has passed
//! 3. Otherwise ask the remote service, one status at a time:
//!    Active, then Pending, then Expired
//!
//! Only Active records (and the Expired copy written when one lapses) are
//! cached. Pending is not cached since payment is expected to land soon.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::types::{subscriptions_collection, SubscriptionRecord, SubscriptionStatus};
use crate::cache::{CacheKey, CacheLayer, ResourceKind};
use crate::config::FailurePolicy;
use crate::remote::{Direction, DocumentService, Query};
use crate::routes::{Navigation, Route};
use crate::session::UserSession;

/// Result of one gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
  /// No decision yet; also where a remote failure leaves the gate under
  /// [`FailurePolicy::StayLoading`]
  Loading,
  Admitted(SubscriptionRecord),
  RedirectLogin,
  /// Valid plan found while sitting on the plan-selection page
  RedirectHome(SubscriptionRecord),
  RedirectPending(SubscriptionRecord),
  RedirectExpired(SubscriptionRecord),
  RedirectNoPlan,
  /// A remote call failed; the caller may retry
  Failed(String),
}

impl GateOutcome {
  pub fn is_admitted(&self) -> bool {
    matches!(self, Self::Admitted(_))
  }

  /// Where the caller should go, if anywhere.
  pub fn navigation(&self) -> Option<Navigation> {
    match self {
      Self::RedirectLogin => Some(Navigation::to(Route::Login).replacing()),
      Self::RedirectHome(_) => Some(Navigation::to(Route::Home)),
      Self::RedirectPending(record) => Some(
        Navigation::to(Route::Plans)
          .with_flag("pending")
          .with_state(record.clone()),
      ),
      Self::RedirectExpired(record) => Some(
        Navigation::to(Route::Plans)
          .with_flag("expired")
          .with_state(record.clone()),
      ),
      Self::RedirectNoPlan => Some(Navigation::to(Route::Plans)),
      Self::Loading | Self::Admitted(_) | Self::Failed(_) => None,
    }
  }
}

pub struct SubscriptionGate {
  service: Arc<dyn DocumentService>,
  cache: CacheLayer,
  plan_ttl: Duration,
  failure_policy: FailurePolicy,
}

impl SubscriptionGate {
  pub fn new(service: Arc<dyn DocumentService>, cache: CacheLayer, plan_ttl: Duration) -> Self {
    Self {
      service,
      cache,
      plan_ttl,
      failure_policy: FailurePolicy::default(),
    }
  }

  pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
    self.failure_policy = policy;
    self
  }

  fn now(&self) -> DateTime<Utc> {
    self.cache.clock().now()
  }

  /// Run the gate for `session` at `current_path`.
  pub async fn evaluate(&self, session: Option<&UserSession>, current_path: &str) -> GateOutcome {
    let Some(session) = session else {
      info!("No session, redirecting to login");
      return GateOutcome::RedirectLogin;
    };

    let outcome = match self.resolve(session, current_path).await {
      Ok(outcome) => outcome,
      Err(e) => {
        error!(uid = %session.uid, error = %e, "Error fetching last plan");
        self.on_failure(session, e.to_string())
      }
    };
    info!(uid = %session.uid, admitted = outcome.is_admitted(), ?outcome, "Gate decision");
    outcome
  }

  async fn resolve(&self, session: &UserSession, current_path: &str) -> Result<GateOutcome> {
    let key = CacheKey::new(ResourceKind::AgencyPlan, &session.uid);

    if let Some(entry) = self.cache.read_fresh::<SubscriptionRecord>(&key, self.plan_ttl)? {
      return self.decide_cached(session, &key, entry.data).await;
    }

    self.decide_remote(session, &key, current_path).await
  }

  async fn decide_cached(
    &self,
    session: &UserSession,
    key: &CacheKey,
    record: SubscriptionRecord,
  ) -> Result<GateOutcome> {
    if !record.has_ended(self.now()) {
      return Ok(GateOutcome::Admitted(record));
    }

    if record.status == SubscriptionStatus::Expired {
      // Already marked, nothing to write
      return Ok(GateOutcome::RedirectExpired(record));
    }

    let expired = self.expire(session, key, &record).await?;
    Ok(GateOutcome::RedirectExpired(expired))
  }

  async fn decide_remote(
    &self,
    session: &UserSession,
    key: &CacheKey,
    current_path: &str,
  ) -> Result<GateOutcome> {
    if let Some(active) = self.latest(session, SubscriptionStatus::Active).await? {
      if active.has_ended(self.now()) {
        let expired = self.expire(session, key, &active).await?;
        return Ok(GateOutcome::RedirectExpired(expired));
      }

      self.cache.write_entry(key, &active)?;
      if Route::from_path(current_path) == Some(Route::Plans) {
        return Ok(GateOutcome::RedirectHome(active));
      }
      return Ok(GateOutcome::Admitted(active));
    }

    if let Some(pending) = self.latest(session, SubscriptionStatus::Pending).await? {
      info!(uid = %session.uid, "Subscription is still awaiting payment");
      return Ok(GateOutcome::RedirectPending(pending));
    }

    if let Some(expired) = self.latest(session, SubscriptionStatus::Expired).await? {
      info!(uid = %session.uid, "Subscription has expired");
      return Ok(GateOutcome::RedirectExpired(expired));
    }

    info!(uid = %session.uid, "No plans found for this agency");
    Ok(GateOutcome::RedirectNoPlan)
  }

  /// Most recent subscription with `status`, by creation time.
  async fn latest(
    &self,
    session: &UserSession,
    status: SubscriptionStatus,
  ) -> Result<Option<SubscriptionRecord>> {
    let query = Query::collection(subscriptions_collection(&session.uid))
      .where_eq("status", status.as_str())
      .order_by("created_at", Direction::Descending)
      .limit(1);

    let docs = self.service.query(&query).await?;
    docs.first().map(|doc| doc.decode()).transpose()
  }

  /// Mark a lapsed subscription Expired remotely and cache the updated copy.
  async fn expire(
    &self,
    session: &UserSession,
    key: &CacheKey,
    record: &SubscriptionRecord,
  ) -> Result<SubscriptionRecord> {
    let path = format!("{}/{}", subscriptions_collection(&session.uid), record.id);
    let mut fields = Map::new();
    fields.insert(
      "status".to_string(),
      Value::String(SubscriptionStatus::Expired.as_str().to_string()),
    );
    self.service.update(&path, fields).await?;

    let expired = record.with_status(SubscriptionStatus::Expired);
    self.cache.write_entry(key, &expired)?;
    info!(uid = %session.uid, subscription = %record.id, "The plan has expired");
    Ok(expired)
  }

  fn on_failure(&self, session: &UserSession, message: String) -> GateOutcome {
    match self.failure_policy {
      FailurePolicy::StayLoading => GateOutcome::Loading,
      FailurePolicy::Surface => GateOutcome::Failed(message),
      FailurePolicy::FailOpenWithCache => {
        let key = CacheKey::new(ResourceKind::AgencyPlan, &session.uid);
        match self.cache.read_entry::<SubscriptionRecord>(&key) {
          Ok(Some(entry))
            if entry.data.status == SubscriptionStatus::Active
              && !entry.data.has_ended(self.now()) =>
          {
            warn!(uid = %session.uid, "Remote unavailable, admitting on cached plan");
            GateOutcome::Admitted(entry.data)
          }
          _ => GateOutcome::Failed(message),
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, KeyValueStore, MemoryStore};
  use crate::clock::{Clock, ManualClock};
  use crate::remote::MemoryDocumentService;
  use chrono::TimeZone;
  use serde_json::json;

  const UID: &str = "agency-1";
  const HOUR: Duration = Duration::from_secs(3600);

  struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    remote: Arc<MemoryDocumentService>,
    gate: SubscriptionGate,
  }

  fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MemoryDocumentService::new(clock.clone()));
    let cache = CacheLayer::new(store.clone(), clock.clone());
    let gate = SubscriptionGate::new(remote.clone(), cache, HOUR);
    Harness {
      clock,
      store,
      remote,
      gate,
    }
  }

  fn session() -> UserSession {
    UserSession::new(UID)
  }

  fn plan_key() -> CacheKey {
    CacheKey::new(ResourceKind::AgencyPlan, UID)
  }

  fn subscription(status: &str, created: &str, end: Option<&str>) -> Value {
    let mut doc = json!({
      "agency": UID,
      "plan": "gold",
      "name": "Gold",
      "maxClients": 50,
      "maxStaff": 5,
      "features": [],
      "periode": 1,
      "status": status,
      "price": 100.0,
      "coupon": null,
      "created_at": created,
    });
    if let Some(end) = end {
      doc["endDate"] = json!(end);
    }
    doc
  }

  fn insert(h: &Harness, id: &str, status: &str, created: &str, end: Option<&str>) {
    h.remote
      .insert(&subscriptions_collection(UID), id, subscription(status, created, end))
      .unwrap();
  }

  fn cache_record(h: &Harness, status: &str, end: &str) {
    let mut data = subscription(status, "2024-01-01T00:00:00+00:00", Some(end));
    data["id"] = json!("s1");
    let record: SubscriptionRecord = serde_json::from_value(data).unwrap();
    let entry = CacheEntry::new(h.clock.now_millis(), record);
    h.store
      .set(plan_key().as_str(), &serde_json::to_string(&entry).unwrap())
      .unwrap();
  }

  fn cached(h: &Harness) -> Option<CacheEntry<Value>> {
    h.store
      .get(plan_key().as_str())
      .unwrap()
      .map(|raw| serde_json::from_str(&raw).unwrap())
  }

  #[tokio::test]
  async fn test_no_session_redirects_to_login() {
    let h = harness();
    let outcome = h.gate.evaluate(None, "/").await;
    assert_eq!(outcome, GateOutcome::RedirectLogin);
    assert_eq!(outcome.navigation().unwrap().route, Route::Login);
    assert_eq!(h.remote.query_count(), 0);
  }

  #[tokio::test]
  async fn test_valid_active_is_admitted_and_cached() {
    let h = harness();
    insert(&h, "s1", "Active", "2024-05-01T00:00:00+00:00", Some("2024-07-01T00:00:00+00:00"));

    let outcome = h.gate.evaluate(Some(&session()), "/").await;

    assert!(outcome.is_admitted());
    assert!(outcome.navigation().is_none());
    let entry = cached(&h).unwrap();
    assert_eq!(entry.data["status"], "Active");
    assert_eq!(entry.data["id"], "s1");
    assert_eq!(entry.timestamp, h.clock.now_millis());
  }

  #[tokio::test]
  async fn test_second_entry_within_ttl_uses_cache() {
    let h = harness();
    insert(&h, "s1", "Active", "2024-05-01T00:00:00+00:00", Some("2024-07-01T00:00:00+00:00"));

    h.gate.evaluate(Some(&session()), "/").await;
    let queries = h.remote.query_count();
    h.clock.advance(chrono::Duration::minutes(59));
    let outcome = h.gate.evaluate(Some(&session()), "/clients").await;

    assert!(outcome.is_admitted());
    assert_eq!(h.remote.query_count(), queries);
  }

  #[tokio::test]
  async fn test_stale_cache_goes_remote() {
    let h = harness();
    cache_record(&h, "Active", "2024-07-01T00:00:00+00:00");
    h.clock.advance(chrono::Duration::minutes(61));

    let outcome = h.gate.evaluate(Some(&session()), "/").await;

    // Nothing remote: the stale cached plan is not trusted
    assert_eq!(outcome, GateOutcome::RedirectNoPlan);
    assert_eq!(h.remote.query_count(), 3);
  }

  #[tokio::test]
  async fn test_admitted_on_plans_page_goes_home() {
    let h = harness();
    insert(&h, "s1", "Active", "2024-05-01T00:00:00+00:00", Some("2024-07-01T00:00:00+00:00"));

    let outcome = h.gate.evaluate(Some(&session()), "/plans?expired=true").await;

    assert!(matches!(outcome, GateOutcome::RedirectHome(_)));
    assert_eq!(outcome.navigation().unwrap().to_string(), "/");
    assert!(cached(&h).is_some());
  }

  #[tokio::test]
  async fn test_cached_lapsed_plan_is_expired_once() {
    let h = harness();
    insert(&h, "s1", "Active", "2024-01-01T00:00:00+00:00", Some("2024-05-01T00:00:00+00:00"));
    cache_record(&h, "Active", "2024-05-01T00:00:00+00:00");

    let first = h.gate.evaluate(Some(&session()), "/").await;

    let updates = h.remote.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, format!("agencies/{}/subscriptions/s1", UID));
    assert_eq!(updates[0].1["status"], "Expired");
    let nav = first.navigation().unwrap();
    assert_eq!(nav.to_string(), "/plans?expired=true");
    assert_eq!(nav.state.unwrap().status, SubscriptionStatus::Expired);
    assert_eq!(cached(&h).unwrap().data["status"], "Expired");

    let second = h.gate.evaluate(Some(&session()), "/").await;
    assert!(matches!(second, GateOutcome::RedirectExpired(_)));
    assert_eq!(h.remote.updates().len(), 1);
    assert_eq!(h.remote.query_count(), 0);
  }

  #[tokio::test]
  async fn test_remote_lapsed_active_is_expired() {
    let h = harness();
    insert(&h, "s1", "Active", "2024-01-01T00:00:00+00:00", Some("2024-05-01T00:00:00+00:00"));

    let outcome = h.gate.evaluate(Some(&session()), "/plans").await;

    match outcome {
      GateOutcome::RedirectExpired(record) => {
        assert_eq!(record.status, SubscriptionStatus::Expired)
      }
      other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(h.remote.updates().len(), 1);
    assert_eq!(cached(&h).unwrap().data["status"], "Expired");

    // The cached Expired copy short-circuits the next entry
    h.gate.evaluate(Some(&session()), "/").await;
    assert_eq!(h.remote.updates().len(), 1);
  }

  #[tokio::test]
  async fn test_pending_redirects_without_caching() {
    let h = harness();
    insert(&h, "p1", "Pending", "2024-05-20T00:00:00+00:00", None);

    let outcome = h.gate.evaluate(Some(&session()), "/").await;

    let nav = outcome.navigation().unwrap();
    assert_eq!(nav.to_string(), "/plans?pending=true");
    assert_eq!(nav.state.unwrap().id, "p1");
    assert!(cached(&h).is_none());
    assert_eq!(h.remote.query_count(), 2);
  }

  #[tokio::test]
  async fn test_only_expired_redirects_expired() {
    let h = harness();
    insert(&h, "old", "Expired", "2023-01-01T00:00:00+00:00", Some("2023-02-01T00:00:00+00:00"));
    insert(&h, "newer", "Expired", "2023-06-01T00:00:00+00:00", Some("2023-07-01T00:00:00+00:00"));

    let outcome = h.gate.evaluate(Some(&session()), "/").await;

    match outcome {
      GateOutcome::RedirectExpired(record) => assert_eq!(record.id, "newer"),
      other => panic!("unexpected outcome {:?}", other),
    }
    assert!(h.remote.updates().is_empty());
  }

  #[tokio::test]
  async fn test_nothing_found_redirects_to_plans_without_payload() {
    let h = harness();

    let outcome = h.gate.evaluate(Some(&session()), "/").await;

    assert_eq!(outcome, GateOutcome::RedirectNoPlan);
    let nav = outcome.navigation().unwrap();
    assert_eq!(nav.to_string(), "/plans");
    assert!(nav.flags.is_empty());
    assert!(nav.state.is_none());
    assert_eq!(h.remote.query_count(), 3);
  }

  #[tokio::test]
  async fn test_most_recent_active_wins() {
    let h = harness();
    insert(&h, "a", "Active", "2024-01-01T00:00:00+00:00", Some("2024-09-01T00:00:00+00:00"));
    insert(&h, "b", "Active", "2024-05-01T00:00:00+00:00", Some("2024-09-01T00:00:00+00:00"));

    match h.gate.evaluate(Some(&session()), "/").await {
      GateOutcome::Admitted(record) => assert_eq!(record.id, "b"),
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_failure_policies() {
    let h = harness();
    h.remote.set_offline(true);

    let surfaced = h.gate.evaluate(Some(&session()), "/").await;
    assert!(matches!(surfaced, GateOutcome::Failed(_)));

    let h = harness();
    h.remote.set_offline(true);
    let gate = SubscriptionGate::new(
      h.remote.clone(),
      CacheLayer::new(h.store.clone(), h.clock.clone()),
      HOUR,
    )
    .with_failure_policy(FailurePolicy::StayLoading);
    assert_eq!(gate.evaluate(Some(&session()), "/").await, GateOutcome::Loading);
  }

  #[tokio::test]
  async fn test_fail_open_uses_stale_cached_plan() {
    let h = harness();
    cache_record(&h, "Active", "2024-07-01T00:00:00+00:00");
    h.clock.advance(chrono::Duration::hours(2));
    h.remote.set_offline(true);

    let gate = SubscriptionGate::new(
      h.remote.clone(),
      CacheLayer::new(h.store.clone(), h.clock.clone()),
      HOUR,
    )
    .with_failure_policy(FailurePolicy::FailOpenWithCache);

    assert!(gate.evaluate(Some(&session()), "/").await.is_admitted());

    // A lapsed cached plan is not enough
    h.clock.set(Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap());
    assert!(matches!(
      gate.evaluate(Some(&session()), "/").await,
      GateOutcome::Failed(_)
    ));
  }

  #[tokio::test]
  async fn test_unreadable_cache_is_a_miss() {
    let h = harness();
    h.store.set(plan_key().as_str(), "not json").unwrap();
    insert(&h, "s1", "Active", "2024-05-01T00:00:00+00:00", Some("2024-07-01T00:00:00+00:00"));

    assert!(h.gate.evaluate(Some(&session()), "/").await.is_admitted());
    assert_eq!(cached(&h).unwrap().data["id"], "s1");
  }
}
