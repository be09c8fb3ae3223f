//! Secondary index definitions
//!
//! The parent-folder index answers "children of folder X" in one query. Its
//! definition is also stored as a design document so that replicas agree on
//! a single authoritative version.

use std::sync::Arc;

use serde_json::{json, Value};

use super::adapter::ViewFn;

/// Name of the parent-folder index
pub const PARENT_FOLDER_VIEW: &str = "parentFolderID";

/// Id prefix reserved for design documents
pub const DESIGN_PREFIX: &str = "_design/";

/// Declarative source of the parent-folder map function
const PARENT_FOLDER_MAP_SOURCE: &str = "function (doc) { emit(doc.parentFolderID); }";

/// Check if an id names a design document
pub fn is_design_id(id: &str) -> bool {
    id.starts_with(DESIGN_PREFIX)
}

/// Id of the design document holding a view's definition
pub fn design_doc_id(view: &str) -> String {
    format!("{}{}", DESIGN_PREFIX, view)
}

/// Build a design document for a single view
pub fn design_doc(view: &str, map_source: &str) -> Value {
    json!({
        "_id": design_doc_id(view),
        "views": {
            view: { "map": map_source }
        }
    })
}

/// Design document for the parent-folder index
pub fn parent_folder_design_doc() -> Value {
    design_doc(PARENT_FOLDER_VIEW, PARENT_FOLDER_MAP_SOURCE)
}

/// Map function of the parent-folder index
///
/// Emits the document's parent id (null for root-level documents). Only
/// typed documents (notes and folders) are indexed.
pub fn parent_folder_view() -> ViewFn {
    Arc::new(|doc: &Value| {
        if doc.get("type").and_then(Value::as_str).is_none() {
            return Vec::new();
        }
        let parent = doc
            .get("parentFolderID")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        vec![parent]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_view_emits_parent() {
        let view = parent_folder_view();
        let keys = view(&json!({"type": "note", "parentFolderID": "f1"}));
        assert_eq!(keys, vec![Some("f1".to_string())]);
    }

    #[test]
    fn test_parent_view_emits_null_for_root() {
        let view = parent_folder_view();
        assert_eq!(view(&json!({"type": "folder", "parentFolderID": null})), vec![None]);
        assert_eq!(view(&json!({"type": "folder"})), vec![None]);
        assert_eq!(view(&json!({"type": "folder", "parentFolderID": ""})), vec![None]);
    }

    #[test]
    fn test_parent_view_skips_untyped_documents() {
        let view = parent_folder_view();
        assert!(view(&json!({"_id": "tagMap", "tags": {}})).is_empty());
    }

    #[test]
    fn test_design_doc_shape() {
        let doc = parent_folder_design_doc();
        assert_eq!(doc["_id"], "_design/parentFolderID");
        assert!(doc["views"]["parentFolderID"]["map"]
            .as_str()
            .unwrap()
            .contains("emit"));
        assert!(is_design_id("_design/parentFolderID"));
        assert!(!is_design_id("tagMap"));
    }
}
