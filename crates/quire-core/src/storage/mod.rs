//! Document storage
//!
//! A revisioned JSON document store on SQLite with materialized views,
//! tombstones and replication conflicts.

mod adapter;
pub mod error;
pub mod revision;
pub mod schema;
mod sqlite;
pub mod views;

pub use adapter::{
    ChangeBatch, DocumentStore, DocumentStoreExt, PutResponse, ReplicatedDoc, Row, RowValue,
    ViewFn,
};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use sqlite::SqliteStore;
pub use views::{parent_folder_design_doc, parent_folder_view, PARENT_FOLDER_VIEW};
