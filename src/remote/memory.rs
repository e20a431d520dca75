//! In-process document service, loadable from a JSON fixture.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use super::traits::{Direction, Document, DocumentService, Query};
use crate::clock::{timestamp_from_value, Clock};

type Collections = BTreeMap<String, BTreeMap<String, Map<String, Value>>>;

/// Document service holding every collection in memory.
///
/// Keeps a log of update calls so callers can assert on remote writes.
pub struct MemoryDocumentService {
  collections: Mutex<Collections>,
  updates: Mutex<Vec<(String, Map<String, Value>)>>,
  queries: AtomicU64,
  next_id: AtomicU64,
  offline: AtomicBool,
  clock: Arc<dyn Clock>,
}

impl MemoryDocumentService {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      collections: Mutex::new(BTreeMap::new()),
      updates: Mutex::new(Vec::new()),
      queries: AtomicU64::new(0),
      next_id: AtomicU64::new(1),
      offline: AtomicBool::new(false),
      clock,
    }
  }

  /// Load a fixture of the form `{"<collection path>": {"<id>": {fields}}}`.
  pub fn from_fixture(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read fixture {}: {}", path.display(), e))?;
    let collections: Collections = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse fixture {}: {}", path.display(), e))?;

    let service = Self::new(clock);
    *service.lock_collections()? = collections;
    Ok(service)
  }

  fn lock_collections(&self) -> Result<std::sync::MutexGuard<'_, Collections>> {
    self
      .collections
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn check_online(&self) -> Result<()> {
    if self.offline.load(AtomicOrdering::SeqCst) {
      return Err(eyre!("Document service unavailable"));
    }
    Ok(())
  }

  fn matching(&self, query: &Query) -> Result<Vec<Document>> {
    self.queries.fetch_add(1, AtomicOrdering::SeqCst);
    let collections = self.lock_collections()?;
    let Some(docs) = collections.get(&query.collection) else {
      return Ok(Vec::new());
    };

    let mut matched: Vec<Document> = docs
      .iter()
      .filter(|(_, fields)| {
        query
          .filters
          .iter()
          .all(|f| fields.get(&f.field) == Some(&f.value))
      })
      .map(|(id, fields)| Document::new(format!("{}/{}", query.collection, id), fields.clone()))
      .collect();

    if let Some(order) = &query.order_by {
      // Documents missing the order field never match an ordered query
      matched.retain(|doc| doc.fields.contains_key(&order.field));
      matched.sort_by(|a, b| {
        let ord = compare_values(&a.fields[&order.field], &b.fields[&order.field]);
        match order.direction {
          Direction::Ascending => ord,
          Direction::Descending => ord.reverse(),
        }
      });
    }

    if let Some(limit) = query.limit {
      matched.truncate(limit as usize);
    }

    Ok(matched)
  }
}

/// Test helpers.
#[cfg(test)]
impl MemoryDocumentService {
  /// Insert or replace a document at `collection/id`.
  pub fn insert(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
    let fields = match fields {
      Value::Object(map) => map,
      other => return Err(eyre!("Document fields must be an object, got {}", other)),
    };
    self
      .lock_collections()?
      .entry(collection.to_string())
      .or_default()
      .insert(id.to_string(), fields);
    Ok(())
  }

  /// Make every call fail, as if the network were down.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, AtomicOrdering::SeqCst);
  }

  /// Update calls received so far, in order.
  pub fn updates(&self) -> Vec<(String, Map<String, Value>)> {
    self.updates.lock().map(|u| u.clone()).unwrap_or_default()
  }

  /// Number of `query` and `count` calls received so far.
  pub fn query_count(&self) -> u64 {
    self.queries.load(AtomicOrdering::SeqCst)
  }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
  if let (Value::Number(x), Value::Number(y)) = (a, b) {
    return x
      .as_f64()
      .partial_cmp(&y.as_f64())
      .unwrap_or(Ordering::Equal);
  }
  // Timestamps compare by instant whatever their stored shape
  if let (Some(x), Some(y)) = (timestamp_from_value(a), timestamp_from_value(b)) {
    return x.cmp(&y);
  }

  match (a, b) {
    (Value::String(x), Value::String(y)) => x.cmp(y),
    (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
    _ => Ordering::Equal,
  }
}

fn split_path(path: &str) -> Result<(&str, &str)> {
  path
    .rsplit_once('/')
    .ok_or_else(|| eyre!("Invalid document path: {}", path))
}

#[async_trait]
impl DocumentService for MemoryDocumentService {
  async fn query(&self, query: &Query) -> Result<Vec<Document>> {
    self.check_online()?;
    self.matching(query)
  }

  async fn get(&self, path: &str) -> Result<Option<Document>> {
    self.check_online()?;
    let (collection, id) = split_path(path)?;
    let collections = self.lock_collections()?;
    Ok(
      collections
        .get(collection)
        .and_then(|docs| docs.get(id))
        .map(|fields| Document::new(path, fields.clone())),
    )
  }

  async fn create(&self, collection: &str, mut fields: Map<String, Value>) -> Result<String> {
    self.check_online()?;
    let id = format!("doc{:06}", self.next_id.fetch_add(1, AtomicOrdering::SeqCst));
    fields.insert(
      "created_at".to_string(),
      Value::String(self.clock.now().to_rfc3339()),
    );
    self
      .lock_collections()?
      .entry(collection.to_string())
      .or_default()
      .insert(id.clone(), fields);
    Ok(format!("{}/{}", collection, id))
  }

  async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
    self.check_online()?;
    let (collection, id) = split_path(path)?;
    {
      let mut collections = self.lock_collections()?;
      let doc = collections
        .get_mut(collection)
        .and_then(|docs| docs.get_mut(id))
        .ok_or_else(|| eyre!("No document to update at {}", path))?;
      for (k, v) in &fields {
        doc.insert(k.clone(), v.clone());
      }
    }
    self
      .updates
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push((path.to_string(), fields));
    Ok(())
  }

  async fn count(&self, query: &Query) -> Result<u64> {
    self.check_online()?;
    let unbounded = Query {
      order_by: None,
      limit: None,
      ..query.clone()
    };
    Ok(self.matching(&unbounded)?.len() as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use serde_json::json;

  fn service() -> MemoryDocumentService {
    MemoryDocumentService::new(Arc::new(ManualClock::at_millis(0)))
  }

  #[tokio::test]
  async fn test_query_filters_orders_and_limits() {
    let svc = service();
    svc
      .insert("subs", "a", json!({"status": "Active", "created_at": "2024-01-01T00:00:00+00:00"}))
      .unwrap();
    svc
      .insert("subs", "b", json!({"status": "Active", "created_at": "2024-03-01T00:00:00+00:00"}))
      .unwrap();
    svc
      .insert("subs", "c", json!({"status": "Pending", "created_at": "2024-04-01T00:00:00+00:00"}))
      .unwrap();
    svc.insert("subs", "d", json!({"status": "Active"})).unwrap();

    let q = Query::collection("subs")
      .where_eq("status", "Active")
      .order_by("created_at", Direction::Descending)
      .limit(1);
    let docs = svc.query(&q).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "b");

    assert_eq!(svc.count(&q).await.unwrap(), 3);
    assert_eq!(svc.query_count(), 2);
  }

  #[tokio::test]
  async fn test_order_by_mixed_timestamp_shapes() {
    let svc = service();
    svc.insert("subs", "a", json!({"created_at": "2024-01-01T00:00:00Z"})).unwrap();
    svc
      .insert("subs", "b", json!({"created_at": "2024-01-01T00:00:00.5+00:00"}))
      .unwrap();
    svc
      .insert("subs", "c", json!({"created_at": {"seconds": 1_704_067_199, "nanoseconds": 0}}))
      .unwrap();

    let q = Query::collection("subs").order_by("created_at", Direction::Descending);
    let ids: Vec<String> = svc.query(&q).await.unwrap().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
  }

  #[tokio::test]
  async fn test_create_stamps_created_at() {
    let svc = service();
    let fields = json!({"status": "Pending"}).as_object().cloned().unwrap();
    let path = svc
      .create("agencies/u/subscriptions", fields)
      .await
      .unwrap();
    let doc = svc.get(&path).await.unwrap().unwrap();
    assert_eq!(doc.fields["created_at"], json!("1970-01-01T00:00:00+00:00"));
  }

  #[tokio::test]
  async fn test_update_records_write() {
    let svc = service();
    svc.insert("subs", "a", json!({"status": "Active"})).unwrap();
    let mut fields = Map::new();
    fields.insert("status".into(), json!("Expired"));
    svc.update("subs/a", fields).await.unwrap();

    let doc = svc.get("subs/a").await.unwrap().unwrap();
    assert_eq!(doc.fields["status"], json!("Expired"));
    assert_eq!(svc.updates().len(), 1);
    assert!(svc.update("subs/zzz", Map::new()).await.is_err());
  }

  #[tokio::test]
  async fn test_offline_fails_every_call() {
    let svc = service();
    svc.set_offline(true);
    assert!(svc.query(&Query::collection("subs")).await.is_err());
    assert!(svc.get("subs/a").await.is_err());
  }

  #[test]
  fn test_fixture_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.json");
    std::fs::write(&path, r#"{"plans": {"gold": {"name": "Gold"}}}"#).unwrap();

    let clock = Arc::new(ManualClock::at_millis(0));
    let svc = MemoryDocumentService::from_fixture(&path, clock).unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let doc = rt.block_on(svc.get("plans/gold")).unwrap().unwrap();
    assert_eq!(doc.fields["name"], json!("Gold"));
  }
}
