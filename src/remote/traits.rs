//! Document model and the service trait shared by all backends.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A document read from the remote service.
///
/// Field values are plain JSON; timestamps are RFC 3339 strings.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
  pub id: String,
  /// Slash-separated path relative to the database root
  pub path: String,
  pub fields: Map<String, Value>,
}

impl Document {
  pub fn new(path: impl Into<String>, fields: Map<String, Value>) -> Self {
    let path = path.into();
    let id = path.rsplit('/').next().unwrap_or_default().to_string();
    Self { id, path, fields }
  }

  /// Deserialize the fields into a typed record, exposing the document id as `id`.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
    let mut fields = self.fields.clone();
    fields.insert("id".to_string(), Value::String(self.id.clone()));
    serde_json::from_value(Value::Object(fields))
      .map_err(|e| eyre!("Failed to decode document {}: {}", self.path, e))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Ascending,
  Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
  pub field: String,
  pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
  pub field: String,
  pub direction: Direction,
}

/// Collection-scoped query: equality filters, one ordering, a limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
  /// Collection path, e.g. `agencies/<uid>/subscriptions`
  pub collection: String,
  pub filters: Vec<FieldFilter>,
  pub order_by: Option<OrderBy>,
  pub limit: Option<u32>,
}

impl Query {
  pub fn collection(path: impl Into<String>) -> Self {
    Self {
      collection: path.into(),
      filters: Vec::new(),
      order_by: None,
      limit: None,
    }
  }

  pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.filters.push(FieldFilter {
      field: field.into(),
      value: value.into(),
    });
    self
  }

  pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
    self.order_by = Some(OrderBy {
      field: field.into(),
      direction,
    });
    self
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// The operations page logic needs from the document database.
#[async_trait]
pub trait DocumentService: Send + Sync {
  /// Run a collection query.
  async fn query(&self, query: &Query) -> Result<Vec<Document>>;

  /// Read one document by path. A missing document is `None`.
  async fn get(&self, path: &str) -> Result<Option<Document>>;

  /// Create a document with a generated id. The service stamps `created_at`
  /// with its own clock. Returns the new document's path.
  async fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<String>;

  /// Overwrite the listed fields of an existing document.
  async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

  /// Count the documents matching a query (ordering and limit are ignored).
  async fn count(&self, query: &Query) -> Result<u64>;
}
