//! Quire Core Library
//!
//! This crate provides the data layer for Quire, a local-first notebook of
//! hashtagged notes organized in nested folders.
//!
//! # Architecture
//!
//! - **SQLite document store**: revisioned JSON documents with a persisted
//!   parent-folder index
//! - **Folder hierarchy**: recursive subtree deletion and orphan cleanup
//! - **Tag index**: a singleton document mapping hashtags to note ids, kept
//!   current with optimistic concurrency
//! - **Replication**: change-feed sync with another database file or a
//!   WebSocket server
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open().await?;
//!
//! let folder = store.create_folder("Groceries", None).await?;
//! store.create_note("Weekly", "buy milk #todo #home", folder.id()).await?;
//!
//! let todo = store.notes_for_tag("todo").await?;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified storage interface (main entry point)
//! - `models`: Notes, folders and the tag map
//! - `storage`: Document store contract and SQLite implementation
//! - `hierarchy`: Folder tree maintenance
//! - `tags`: Hashtag extraction and indexing
//! - `sync`: Replication
//! - `backup`: Export and import
//! - `settings`: Persistent key-value settings
//! - `config`: Application configuration

pub mod backup;
pub mod config;
pub mod hierarchy;
pub mod models;
pub mod settings;
pub mod storage;
pub mod store;
pub mod sync;
pub mod tags;

pub use backup::{Backup, ImportOutcome};
pub use config::Config;
pub use hierarchy::{DeletionObserver, FolderHierarchy, OrphanReport};
pub use models::{Document, DocumentKind, TagMap, TAG_MAP_ID};
pub use settings::{FileSettings, MemorySettings, SettingsError, SettingsStore};
pub use storage::{DocumentStore, DocumentStoreExt, ErrorKind, SqliteStore, StoreError};
pub use store::Store;
pub use sync::{ReplicationHandle, ReplicationOptions, SyncController, SyncEvent, SyncReport};
pub use tags::{extract_tags, TagEvent, TagIndex};
