//! Document store contract
//!
//! Every engine in the crate talks to storage exclusively through
//! [`DocumentStore`]. Documents travel as JSON objects carrying their id in
//! `_id` and their revision in `_rev`, the same shape used on disk, on the
//! wire and in backups.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{StoreError, StoreResult};
use super::views::PARENT_FOLDER_VIEW;

/// A secondary index mapping function
///
/// Receives a stored document (with `_id`/`_rev`) and returns the keys it is
/// indexed under; `None` emits a null key.
pub type ViewFn = Arc<dyn Fn(&Value) -> Vec<Option<String>> + Send + Sync>;

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

/// Revision carried in a row's `value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowValue {
    pub rev: String,
}

/// One entry returned by `all_docs` or `query`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub key: Value,
    pub value: RowValue,
    pub doc: Value,
}

impl Row {
    /// The `type` discriminator of the row's document, if any
    pub fn doc_type(&self) -> Option<&str> {
        self.doc.get("type").and_then(Value::as_str)
    }

    pub fn is_note(&self) -> bool {
        self.doc_type() == Some("note")
    }

    pub fn is_folder(&self) -> bool {
        self.doc_type() == Some("folder")
    }

    /// Non-empty `parentFolderID` of the row's document
    pub fn parent_folder_id(&self) -> Option<&str> {
        self.doc
            .get("parentFolderID")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn rev(&self) -> &str {
        &self.value.rev
    }

    /// Deserialize the row's document
    pub fn parse<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.doc.clone())?)
    }
}

/// One document revision as exchanged between replicas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedDoc {
    pub id: String,
    pub rev: String,
    #[serde(default)]
    pub deleted: bool,
    /// Document fields without `_id`/`_rev`
    pub body: Value,
    /// Ancestor revisions, oldest first
    #[serde(default)]
    pub history: Vec<String>,
}

/// A page of the change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub docs: Vec<ReplicatedDoc>,
    /// Highest update sequence included in this batch
    pub last_seq: u64,
    /// More changes are waiting after `last_seq`
    pub pending: bool,
}

/// Local document store primitives
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a live document by id
    async fn get(&self, id: &str) -> StoreResult<Value>;

    /// Create or update a document; `_rev` must match the current revision
    async fn put(&self, doc: Value) -> StoreResult<PutResponse>;

    /// Create a document with a store-assigned id
    async fn post(&self, doc: Value) -> StoreResult<PutResponse>;

    /// Delete the given revision of a document
    async fn remove(&self, id: &str, rev: &str) -> StoreResult<PutResponse>;

    /// Snapshot of every live document, ordered by id
    async fn all_docs(&self) -> StoreResult<Vec<Row>>;

    /// Rows of a registered view whose emitted key equals `key`
    async fn query(&self, view: &str, key: Option<&str>) -> StoreResult<Vec<Row>>;

    /// Losing revisions recorded for a live document
    async fn get_conflicts(&self, id: &str) -> StoreResult<Vec<String>>;

    /// Register (or replace) a view and rebuild its rows
    async fn register_view(&self, name: &str, map: ViewFn) -> StoreResult<()>;

    /// Delete every document, conflict, index row and checkpoint
    async fn destroy(&self) -> StoreResult<()>;
}

/// Typed conveniences over [`DocumentStore`]
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    /// Fetch and deserialize a document
    async fn get_as<T: DeserializeOwned + Send>(&self, id: &str) -> StoreResult<T> {
        let value = self.get(id).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize and put a document
    async fn put_as<T: Serialize + Sync>(&self, doc: &T) -> StoreResult<PutResponse> {
        let value = serde_json::to_value(doc)?;
        self.put(value).await
    }

    /// Children of a folder, or root-level documents for `None`
    async fn query_by_parent(&self, parent: Option<&str>) -> StoreResult<Vec<Row>> {
        self.query(PARENT_FOLDER_VIEW, parent).await
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

/// Split a JSON document into id, revision and body
///
/// The body keeps every field except `_id`, `_rev` and `_conflicts`.
pub(crate) fn split_document(
    doc: Value,
) -> StoreResult<(Option<String>, Option<String>, serde_json::Map<String, Value>)> {
    let Value::Object(mut body) = doc else {
        return Err(StoreError::InvalidDocument(
            "document must be a JSON object".to_string(),
        ));
    };

    let id = match body.remove("_id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(StoreError::InvalidDocument(format!(
                "_id must be a non-empty string, got {}",
                other
            )))
        }
    };

    let rev = match body.remove("_rev") {
        Some(Value::String(rev)) => Some(rev),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(StoreError::InvalidDocument(format!(
                "_rev must be a string, got {}",
                other
            )))
        }
    };

    body.remove("_conflicts");
    Ok((id, rev, body))
}

/// Reassemble a stored body with its id and revision
pub(crate) fn join_document(id: &str, rev: &str, body: Value) -> Value {
    let mut map = match body {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    map.insert("_id".to_string(), Value::String(id.to_string()));
    map.insert("_rev".to_string(), Value::String(rev.to_string()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_document() {
        let (id, rev, body) = split_document(json!({
            "_id": "n1",
            "_rev": "1-abc",
            "_conflicts": ["1-def"],
            "type": "note"
        }))
        .unwrap();

        assert_eq!(id.as_deref(), Some("n1"));
        assert_eq!(rev.as_deref(), Some("1-abc"));
        assert_eq!(body.len(), 1);
        assert_eq!(body["type"], "note");
    }

    #[test]
    fn test_split_rejects_non_objects() {
        assert!(split_document(json!([1, 2])).is_err());
        assert!(split_document(json!({"_id": 7})).is_err());
    }

    #[test]
    fn test_join_document() {
        let doc = join_document("f1", "2-x", json!({"type": "folder", "name": "Work"}));
        assert_eq!(doc["_id"], "f1");
        assert_eq!(doc["_rev"], "2-x");
        assert_eq!(doc["name"], "Work");
    }

    #[test]
    fn test_row_accessors() {
        let row = Row {
            id: "n1".to_string(),
            key: json!("f1"),
            value: RowValue {
                rev: "1-a".to_string(),
            },
            doc: json!({"_id": "n1", "type": "note", "parentFolderID": "f1"}),
        };

        assert!(row.is_note());
        assert!(!row.is_folder());
        assert_eq!(row.parent_folder_id(), Some("f1"));
        assert_eq!(row.rev(), "1-a");
    }

    #[test]
    fn test_row_empty_parent_is_root() {
        let row = Row {
            id: "n1".to_string(),
            key: Value::Null,
            value: RowValue {
                rev: "1-a".to_string(),
            },
            doc: json!({"_id": "n1", "type": "note", "parentFolderID": ""}),
        };
        assert_eq!(row.parent_folder_id(), None);
    }
}
