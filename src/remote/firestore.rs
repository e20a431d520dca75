//! Firestore REST client.
//!
//! Firestore wraps every field in a typed envelope
//! (`{"stringValue": "x"}`, `{"integerValue": "3"}`, ...). The rest of the
//! crate works with plain JSON, so values are unwrapped on read and wrapped
//! on write here.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::traits::{Direction, Document, DocumentService, Query};
use crate::config::{Config, FirestoreConfig};

/// Firestore API client wrapper
#[derive(Clone)]
pub struct FirestoreClient {
  http: reqwest::Client,
  /// `<base>/projects/<project>/databases/<database>/documents`
  documents_root: String,
  token: String,
}

impl FirestoreClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_firestore_token()?;
    Self::with_token(&config.firestore, token)
  }

  pub fn with_token(fs: &FirestoreConfig, token: String) -> Result<Self> {
    if fs.project_id.is_empty() {
      return Err(eyre!("firestore.project_id is not set in the configuration"));
    }

    let documents_root = format!(
      "{}/projects/{}/databases/{}/documents",
      fs.base_url.trim_end_matches('/'),
      fs.project_id,
      fs.database
    );
    // Fail early on a malformed base_url
    Url::parse(&documents_root)
      .map_err(|e| eyre!("Invalid Firestore URL {}: {}", documents_root, e))?;

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      documents_root,
      token,
    })
  }

  fn url(&self, suffix: &str) -> Result<Url> {
    let raw = if suffix.is_empty() {
      self.documents_root.clone()
    } else if suffix.starts_with(':') {
      format!("{}{}", self.documents_root, suffix)
    } else {
      format!("{}/{}", self.documents_root, suffix)
    };
    Url::parse(&raw).map_err(|e| eyre!("Invalid Firestore URL {}: {}", raw, e))
  }

  /// Full resource name of a document path, as used inside request bodies.
  fn resource_name(&self, path: &str) -> String {
    let root = self
      .documents_root
      .split_once("/projects/")
      .map(|(_, rest)| rest)
      .unwrap_or(&self.documents_root);
    format!("projects/{}/{}", root, path)
  }

  async fn post<T: DeserializeOwned>(&self, url: Url, body: Value) -> Result<T> {
    debug!(%url, "POST");
    let response = self
      .http
      .post(url.clone())
      .bearer_auth(&self.token)
      .json(&body)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?
      .error_for_status()
      .map_err(|e| eyre!("Firestore rejected request to {}: {}", url, e))?;

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse Firestore response from {}: {}", url, e))
  }
}

#[async_trait]
impl DocumentService for FirestoreClient {
  async fn query(&self, query: &Query) -> Result<Vec<Document>> {
    let (parent, structured) = structured_query(query)?;
    let url = if parent.is_empty() {
      self.url(":runQuery")?
    } else {
      self.url(&format!("{}:runQuery", parent))?
    };

    let rows: Vec<ApiRunQueryRow> = self
      .post(url, json!({ "structuredQuery": structured }))
      .await?;

    rows
      .into_iter()
      .filter_map(|row| row.document)
      .map(|doc| doc.into_document())
      .collect()
  }

  async fn get(&self, path: &str) -> Result<Option<Document>> {
    let url = self.url(path)?;
    debug!(%url, "GET");
    let response = self
      .http
      .get(url.clone())
      .bearer_auth(&self.token)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }

    let doc: ApiDocument = response
      .error_for_status()
      .map_err(|e| eyre!("Firestore rejected request to {}: {}", url, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse document {}: {}", path, e))?;

    doc.into_document().map(Some)
  }

  async fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
    // One commit carries the fields and the server timestamp, so a document
    // never exists without created_at
    let path = format!("{}/{}", collection.trim_end_matches('/'), Uuid::new_v4().simple());
    let body = json!({
      "writes": [{
        "update": {
          "name": self.resource_name(&path),
          "fields": encode_fields(&fields)
        },
        "updateTransforms": [{ "fieldPath": "created_at", "setToServerValue": "REQUEST_TIME" }],
        "currentDocument": { "exists": false }
      }]
    });
    let _: Value = self.post(self.url(":commit")?, body).await?;

    Ok(path)
  }

  async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
    let mut url = self.url(path)?;
    {
      let mut pairs = url.query_pairs_mut();
      for name in fields.keys() {
        pairs.append_pair("updateMask.fieldPaths", name);
      }
      // Fail if the document vanished instead of recreating it
      pairs.append_pair("currentDocument.exists", "true");
    }
    debug!(%url, "PATCH");

    self
      .http
      .patch(url.clone())
      .bearer_auth(&self.token)
      .json(&json!({ "name": self.resource_name(path), "fields": encode_fields(&fields) }))
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?
      .error_for_status()
      .map_err(|e| eyre!("Firestore rejected update of {}: {}", path, e))?;

    Ok(())
  }

  async fn count(&self, query: &Query) -> Result<u64> {
    let unbounded = Query {
      order_by: None,
      limit: None,
      ..query.clone()
    };
    let (parent, structured) = structured_query(&unbounded)?;
    let url = if parent.is_empty() {
      self.url(":runAggregationQuery")?
    } else {
      self.url(&format!("{}:runAggregationQuery", parent))?
    };

    let body = json!({
      "structuredAggregationQuery": {
        "structuredQuery": structured,
        "aggregations": [{ "alias": "total", "count": {} }]
      }
    });
    let rows: Vec<ApiAggregationRow> = self.post(url, body).await?;

    rows
      .into_iter()
      .find_map(|row| row.result)
      .and_then(|result| result.aggregate_fields.get("total").map(decode_value))
      .and_then(|v| v.as_u64())
      .ok_or_else(|| eyre!("Count query on {} returned no result", query.collection))
  }
}

/// Split a query into its parent document path and `structuredQuery` body.
fn structured_query(query: &Query) -> Result<(String, Value)> {
  let (parent, collection_id) = match query.collection.rsplit_once('/') {
    Some((parent, id)) => (parent.to_string(), id.to_string()),
    None => (String::new(), query.collection.clone()),
  };
  if collection_id.is_empty() {
    return Err(eyre!("Invalid collection path: {}", query.collection));
  }

  let mut structured = json!({ "from": [{ "collectionId": collection_id }] });

  let filters: Vec<Value> = query
    .filters
    .iter()
    .map(|f| {
      json!({
        "fieldFilter": {
          "field": { "fieldPath": f.field },
          "op": "EQUAL",
          "value": encode_value(&f.value)
        }
      })
    })
    .collect();
  match filters.len() {
    0 => {}
    1 => structured["where"] = filters[0].clone(),
    _ => {
      structured["where"] = json!({ "compositeFilter": { "op": "AND", "filters": filters } });
    }
  }

  if let Some(order) = &query.order_by {
    let direction = match order.direction {
      Direction::Ascending => "ASCENDING",
      Direction::Descending => "DESCENDING",
    };
    structured["orderBy"] = json!([{
      "field": { "fieldPath": order.field },
      "direction": direction
    }]);
  }

  if let Some(limit) = query.limit {
    structured["limit"] = json!(limit);
  }

  Ok((parent, structured))
}

// ============================================================================
// Value envelopes
// ============================================================================

/// Unwrap a Firestore typed value into plain JSON.
fn decode_value(value: &Value) -> Value {
  let Some(obj) = value.as_object() else {
    return Value::Null;
  };
  let Some((kind, inner)) = obj.iter().next() else {
    return Value::Null;
  };

  match kind.as_str() {
    "nullValue" => Value::Null,
    "booleanValue" => inner.clone(),
    // 64-bit integers travel as strings
    "integerValue" => inner
      .as_str()
      .and_then(|s| s.parse::<i64>().ok())
      .map(Value::from)
      .unwrap_or_else(|| inner.clone()),
    "doubleValue" => inner.clone(),
    "timestampValue" | "stringValue" | "referenceValue" | "bytesValue" => inner.clone(),
    "geoPointValue" => inner.clone(),
    "arrayValue" => Value::Array(
      inner
        .get("values")
        .and_then(Value::as_array)
        .map(|values| values.iter().map(decode_value).collect())
        .unwrap_or_default(),
    ),
    "mapValue" => Value::Object(
      inner
        .get("fields")
        .and_then(Value::as_object)
        .map(decode_fields)
        .unwrap_or_default(),
    ),
    _ => Value::Null,
  }
}

fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
  fields
    .iter()
    .map(|(k, v)| (k.clone(), decode_value(v)))
    .collect()
}

/// Wrap plain JSON into a Firestore typed value.
fn encode_value(value: &Value) -> Value {
  match value {
    Value::Null => json!({ "nullValue": null }),
    Value::Bool(b) => json!({ "booleanValue": b }),
    Value::Number(n) => match n.as_i64() {
      Some(i) => json!({ "integerValue": i.to_string() }),
      None => json!({ "doubleValue": n.as_f64() }),
    },
    Value::String(s) => json!({ "stringValue": s }),
    Value::Array(values) => {
      json!({ "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() } })
    }
    Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
  }
}

fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
  fields
    .iter()
    .map(|(k, v)| (k.clone(), encode_value(v)))
    .collect()
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiDocument {
  name: String,
  #[serde(default)]
  fields: Map<String, Value>,
}

impl ApiDocument {
  /// Path below `.../documents/`.
  fn relative_path(&self) -> Result<String> {
    self
      .name
      .split_once("/documents/")
      .map(|(_, path)| path.to_string())
      .ok_or_else(|| eyre!("Unexpected document name: {}", self.name))
  }

  fn into_document(self) -> Result<Document> {
    let path = self.relative_path()?;
    Ok(Document::new(path, decode_fields(&self.fields)))
  }
}

#[derive(Debug, Deserialize)]
struct ApiRunQueryRow {
  document: Option<ApiDocument>,
}

#[derive(Debug, Deserialize)]
struct ApiAggregationRow {
  result: Option<ApiAggregationResult>,
}

#[derive(Debug, Deserialize)]
struct ApiAggregationResult {
  #[serde(rename = "aggregateFields", default)]
  aggregate_fields: Map<String, Value>,
}
