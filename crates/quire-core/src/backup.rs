//! Export and import
//!
//! A backup is the full document listing wrapped as `{ "data": [rows] }`.
//! Importing replays each row's document through `put`. Failures are
//! collected per document rather than aborting the import.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::storage::{DocumentStore, ErrorKind, Row, StoreResult};

/// Snapshot of every document in a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub data: Vec<Row>,
}

impl Backup {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of importing one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub id: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Dump every live document
pub async fn export(store: &dyn DocumentStore) -> StoreResult<Backup> {
    let data = store.all_docs().await?;
    info!(docs = data.len(), "Exported documents");
    Ok(Backup { data })
}

/// Write each document of a backup into the store
pub async fn import(store: &dyn DocumentStore, backup: &Backup) -> Vec<ImportOutcome> {
    let mut outcomes = Vec::with_capacity(backup.data.len());

    for row in &backup.data {
        let mut doc = row.doc.clone();
        if let Value::Object(map) = &mut doc {
            map.entry("_id")
                .or_insert_with(|| Value::String(row.id.clone()));
        }
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or(&row.id)
            .to_string();

        let outcome = match store.put(doc).await {
            Ok(_) => ImportOutcome {
                id,
                succeeded: true,
                error_kind: None,
                message: None,
            },
            Err(e) => {
                let message = if e.is_conflict() {
                    format!("{} was in conflict and was not imported", id)
                } else {
                    format!("{} was not imported: {}", id, e)
                };
                warn!("{}", message);
                ImportOutcome {
                    id,
                    succeeded: false,
                    error_kind: Some(e.kind()),
                    message: Some(message),
                }
            }
        };
        outcomes.push(outcome);
    }

    let imported = outcomes.iter().filter(|o| o.succeeded).count();
    info!(
        imported,
        failed = outcomes.len() - imported,
        "Imported documents"
    );
    outcomes
}
