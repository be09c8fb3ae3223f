//! Unified storage interface
//!
//! The `Store` owns the local database and coordinates between:
//! - `FolderHierarchy` (structural deletes and orphan cleanup)
//! - `TagIndex` (hashtag index, notified of every deletion)
//! - `SyncController` (remote URL and replication sessions)
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open().await?;
//!
//! let folder = store.create_folder("Work", None).await?;
//! let note = store.create_note("Standup", "#todo ship it", folder.id()).await?;
//!
//! let tags = store.tags().await?;
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::backup::{self, Backup, ImportOutcome};
use crate::config::Config;
use crate::hierarchy::{FolderHierarchy, OrphanReport};
use crate::models::{Document, TagMap};
use crate::settings::{FileSettings, MemorySettings, SettingsStore};
use crate::storage::views::design_doc_id;
use crate::storage::{
    parent_folder_design_doc, DocumentStore, DocumentStoreExt, SqliteStore, StoreResult,
    PARENT_FOLDER_VIEW,
};
use crate::sync::{ReplicationHandle, SyncController, SyncReport};
use crate::tags::{TagEvent, TagIndex};

/// Unified storage interface for Quire
pub struct Store {
    local: SqliteStore,
    docs: Arc<dyn DocumentStore>,
    hierarchy: FolderHierarchy,
    tags: TagIndex,
    sync: SyncController,
    config: Config,
}

impl Store {
    /// Open the store using the default configuration
    pub async fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config).await
    }

    /// Open the store with a specific configuration
    pub async fn open_with_config(config: Config) -> Result<Self> {
        let path = config.database_path();
        let local = SqliteStore::open(&path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        let settings = Arc::new(FileSettings::new(config.settings_path()));
        Self::assemble(local, settings, config).await
    }

    /// Open a store that lives only in memory
    pub async fn open_in_memory() -> Result<Self> {
        let local = SqliteStore::open_in_memory().context("Failed to open in-memory database")?;
        Self::assemble(local, Arc::new(MemorySettings::new()), Config::default()).await
    }

    async fn assemble(
        local: SqliteStore,
        settings: Arc<dyn SettingsStore>,
        config: Config,
    ) -> Result<Self> {
        let docs: Arc<dyn DocumentStore> = Arc::new(local.clone());
        let tags =
            TagIndex::new(docs.clone()).with_conflict_retries(config.tag_conflict_retries);
        let hierarchy = FolderHierarchy::new(docs.clone()).with_observer(Arc::new(tags.clone()));
        let sync = SyncController::new(
            local.clone(),
            settings,
            config.sync.replication_options(),
        );

        let store = Self {
            local,
            docs,
            hierarchy,
            tags,
            sync,
            config,
        };
        store
            .init_indexes()
            .await
            .context("Failed to initialize indexes")?;
        Ok(store)
    }

    /// Make sure exactly one parent-folder index definition exists
    ///
    /// Conflicting revisions of the definition are deleted. A concurrent
    /// creation counts as success.
    async fn init_indexes(&self) -> StoreResult<()> {
        let id = design_doc_id(PARENT_FOLDER_VIEW);

        match self.docs.get_conflicts(&id).await {
            Ok(conflicts) => {
                for rev in conflicts {
                    match self.docs.remove(&id, &rev).await {
                        Ok(_) => debug!(%id, %rev, "Removed conflicting index definition"),
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => match self.docs.put(parent_folder_design_doc()).await {
                Ok(_) => {
                    info!(%id, "Created index definition");
                    Ok(())
                }
                Err(e) if e.is_conflict() => Ok(()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying document database
    pub fn local(&self) -> &SqliteStore {
        &self.local
    }

    // ==================== Documents ====================

    /// Create a folder, at the root when `parent` is `None`
    pub async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<Document> {
        self.ensure_folder(parent).await?;
        let folder = Document::folder(name, parent.map(str::to_string));
        self.insert(folder).await
    }

    /// Create a note and index its tags
    pub async fn create_note(
        &self,
        title: &str,
        body: &str,
        parent: Option<&str>,
    ) -> Result<Document> {
        self.ensure_folder(parent).await?;
        let note = self
            .insert(Document::note(title, body, parent.map(str::to_string)))
            .await?;
        self.tags
            .save_note(&note)
            .await
            .context("Failed to index note tags")?;
        Ok(note)
    }

    /// Save changes to an existing note and re-index its tags
    pub async fn update_note(&self, mut note: Document) -> Result<Document> {
        if !note.is_note() {
            bail!("Not a note: {}", note.id().unwrap_or_default());
        }
        let response = self
            .docs
            .put_as(&note)
            .await
            .context("Failed to save note")?;
        note.rev = Some(response.rev);
        self.tags
            .save_note(&note)
            .await
            .context("Failed to index note tags")?;
        Ok(note)
    }

    /// Rename a folder
    pub async fn rename_folder(&self, mut folder: Document, name: &str) -> Result<Document> {
        if !folder.is_folder() {
            bail!("Not a folder: {}", folder.id().unwrap_or_default());
        }
        folder.set_display_name(name);
        let response = self
            .docs
            .put_as(&folder)
            .await
            .context("Failed to save folder")?;
        folder.rev = Some(response.rev);
        Ok(folder)
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        self.docs
            .get_as(id)
            .await
            .with_context(|| format!("Failed to load document '{}'", id))
    }

    /// Every note and folder in the store
    pub async fn all_documents(&self) -> Result<Vec<Document>> {
        let rows = self
            .docs
            .all_docs()
            .await
            .context("Failed to list documents")?;
        rows.iter()
            .filter(|row| row.is_note() || row.is_folder())
            .map(|row| row.parse::<Document>())
            .collect::<StoreResult<Vec<_>>>()
            .context("Failed to read documents")
    }

    /// Notes and folders directly inside a folder; folders first
    pub async fn list_folder(&self, parent: Option<&str>) -> Result<Vec<Document>> {
        let rows = self
            .docs
            .query_by_parent(parent)
            .await
            .context("Failed to list folder contents")?;

        let mut docs = rows
            .iter()
            .map(|row| row.parse::<Document>())
            .collect::<StoreResult<Vec<_>>>()
            .context("Failed to read folder contents")?;
        docs.sort_by(|a, b| {
            b.is_folder()
                .cmp(&a.is_folder())
                .then_with(|| a.display_name().cmp(b.display_name()))
        });
        Ok(docs)
    }

    /// Delete a note and drop it from the tag map
    pub async fn delete_note(&self, note: &Document) -> Result<()> {
        self.hierarchy
            .delete_note(note)
            .await
            .context("Failed to delete note")
    }

    /// Delete a folder with everything beneath it
    pub async fn delete_folder(&self, folder: &Document) -> Result<()> {
        self.hierarchy
            .delete_folder_subtree(folder)
            .await
            .context("Failed to delete folder")
    }

    /// Remove documents whose parent folder no longer exists
    pub async fn clean_orphans(&self) -> Result<OrphanReport> {
        self.hierarchy
            .clean_orphans()
            .await
            .context("Failed to clean orphans")
    }

    // ==================== Tags ====================

    /// The tag map; empty before the first tagged note is saved
    pub async fn tags(&self) -> Result<TagMap> {
        match self.tags.get_map().await {
            Ok(map) => Ok(map),
            Err(e) if e.is_not_found() => Ok(TagMap::default()),
            Err(e) => Err(e).context("Failed to read tag map"),
        }
    }

    /// Notes listed under a tag; the leading `#` is optional
    pub async fn notes_for_tag(&self, tag: &str) -> Result<Vec<Document>> {
        let tag = normalize_tag(tag);
        let map = self.tags().await?;

        let mut notes = Vec::new();
        for id in map.notes_for(&tag) {
            match self.docs.get_as::<Document>(id).await {
                Ok(note) => notes.push(note),
                Err(e) if e.is_not_found() => debug!(%id, %tag, "Tag map lists a missing note"),
                Err(e) => return Err(e).context("Failed to load tagged note"),
            }
        }
        Ok(notes)
    }

    /// Receive an event after every tag map update
    pub fn subscribe_tags(&self) -> broadcast::Receiver<TagEvent> {
        self.tags.subscribe()
    }

    // ==================== Backup ====================

    pub async fn export(&self) -> Result<Backup> {
        backup::export(self.docs.as_ref())
            .await
            .context("Failed to export documents")
    }

    /// Import a backup; per-document failures are reported, not fatal
    pub async fn import(&self, backup: &Backup) -> Vec<ImportOutcome> {
        backup::import(self.docs.as_ref(), backup).await
    }

    /// Wipe the database and forget the remote, leaving a fresh store
    pub async fn destroy(&self) -> Result<()> {
        self.docs
            .destroy()
            .await
            .context("Failed to destroy database")?;
        self.sync
            .clear_remote_url()
            .context("Failed to clear remote URL")?;
        self.init_indexes()
            .await
            .context("Failed to initialize indexes")?;
        info!("Database destroyed");
        Ok(())
    }

    // ==================== Sync ====================

    pub fn remote_url(&self) -> Result<Option<String>> {
        Ok(self.sync.remote_url()?)
    }

    pub fn set_remote_url(&self, url: &str) -> Result<()> {
        Ok(self.sync.set_remote_url(url)?)
    }

    pub fn clear_remote_url(&self) -> Result<()> {
        Ok(self.sync.clear_remote_url()?)
    }

    /// Pull then push once against the stored remote
    pub async fn sync_once(&self) -> Result<SyncReport> {
        Ok(self.sync.sync_once().await?)
    }

    /// Start replication if a remote is stored
    pub fn init_sync(&self) -> Result<Option<ReplicationHandle>> {
        Ok(self.sync.init()?)
    }

    /// Start replication with the stored remote
    pub fn start_sync(&self) -> Result<ReplicationHandle> {
        Ok(self.sync.setup_sync()?)
    }

    // ==================== Helpers ====================

    async fn insert(&self, mut doc: Document) -> Result<Document> {
        let response = self
            .docs
            .post(doc.to_value()?)
            .await
            .with_context(|| format!("Failed to create {}", doc.type_name()))?;
        doc.id = Some(response.id);
        doc.rev = Some(response.rev);
        Ok(doc)
    }

    async fn ensure_folder(&self, parent: Option<&str>) -> Result<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        let doc = self
            .get_document(parent)
            .await
            .with_context(|| format!("Parent folder '{}' does not exist", parent))?;
        if !doc.is_folder() {
            bail!("'{}' is not a folder", parent);
        }
        Ok(())
    }
}

/// Lowercase a tag and add the leading `#`
fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim().to_lowercase();
    if tag.starts_with('#') {
        tag
    } else {
        format!("#{}", tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_open_creates_index_definition() {
        let store = Store::open_in_memory().await.unwrap();
        let design = store
            .local()
            .get(&design_doc_id(PARENT_FOLDER_VIEW))
            .await
            .unwrap();
        assert!(design["views"][PARENT_FOLDER_VIEW]["map"].is_string());
    }

    #[tokio::test]
    async fn test_reopen_keeps_single_index_definition() {
        let temp_dir = TempDir::new().unwrap();
        let first = Store::open_with_config(test_config(&temp_dir)).await.unwrap();
        let id = design_doc_id(PARENT_FOLDER_VIEW);
        let rev = first.local().get(&id).await.unwrap()["_rev"].clone();
        drop(first);

        let second = Store::open_with_config(test_config(&temp_dir)).await.unwrap();
        assert_eq!(second.local().get(&id).await.unwrap()["_rev"], rev);
        assert!(second.local().get_conflicts(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_index_definitions_are_removed() {
        let store = Store::open_in_memory().await.unwrap();
        let id = design_doc_id(PARENT_FOLDER_VIEW);

        // A competing definition arriving from another replica
        let other = SqliteStore::open_in_memory().unwrap();
        other.put(parent_folder_design_doc()).await.unwrap();
        crate::sync::sync_once(store.local(), &other, 10)
            .await
            .unwrap();
        assert_eq!(store.local().get_conflicts(&id).await.unwrap().len(), 1);

        store.init_indexes().await.unwrap();
        assert!(store.local().get_conflicts(&id).await.unwrap().is_empty());
        assert!(store.local().get(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_note_lifecycle_keeps_tags_current() {
        let store = Store::open_in_memory().await.unwrap();
        let folder = store.create_folder("Errands", None).await.unwrap();
        let note = store
            .create_note("List", "buy milk #todo #home", folder.id())
            .await
            .unwrap();

        let map = store.tags().await.unwrap();
        assert!(map.contains("#todo", note.id().unwrap()));
        assert!(map.contains("#home", note.id().unwrap()));

        let mut edited = note.clone();
        edited.set_body("done #archive");
        let edited = store.update_note(edited).await.unwrap();

        let map = store.tags().await.unwrap();
        assert!(!map.tags.contains_key("#todo"));
        assert_eq!(store.notes_for_tag("Archive").await.unwrap().len(), 1);

        store.delete_note(&edited).await.unwrap();
        assert!(store.tags().await.unwrap().tags.is_empty());
        assert!(store.get_document(note.id().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_list_folder_puts_folders_first() {
        let store = Store::open_in_memory().await.unwrap();
        let root = store.create_folder("Root", None).await.unwrap();
        store.create_note("a note", "", root.id()).await.unwrap();
        store.create_folder("z folder", root.id()).await.unwrap();

        let children = store.list_folder(root.id()).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[0].is_folder());
        assert!(children[1].is_note());

        let top = store.list_folder(None).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].display_name(), "Root");
    }

    #[tokio::test]
    async fn test_create_under_missing_or_non_folder_parent_fails() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.create_note("x", "", Some("nope")).await.is_err());

        let note = store.create_note("n", "", None).await.unwrap();
        assert!(store.create_folder("f", note.id()).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_folder_removes_subtree_and_tags() {
        let store = Store::open_in_memory().await.unwrap();
        let top = store.create_folder("top", None).await.unwrap();
        let inner = store.create_folder("inner", top.id()).await.unwrap();
        let note = store
            .create_note("deep", "#deep", inner.id())
            .await
            .unwrap();
        let keep = store.create_note("keep", "#keep", None).await.unwrap();

        store.delete_folder(&top).await.unwrap();

        for id in [top.id(), inner.id(), note.id()] {
            assert!(store.get_document(id.unwrap()).await.is_err());
        }
        let map = store.tags().await.unwrap();
        assert!(!map.tags.contains_key("#deep"));
        assert!(map.contains("#keep", keep.id().unwrap()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_wide_folder_with_concurrent_notes() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let top = store.create_folder("top", None).await.unwrap();
        let mut branches = Vec::new();
        for i in 0..200 {
            let branch = store
                .create_folder(&format!("b{}", i), top.id())
                .await
                .unwrap();
            branches.push(branch.id().unwrap().to_string());
        }

        let mut handles = Vec::new();
        for (i, branch) in branches.into_iter().enumerate() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_note(&format!("n{}", i), "#inside #shared", Some(&branch))
                    .await
            }));
        }
        for i in 0..56 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_note(&format!("root{}", i), "#outside #shared", None)
                    .await
            }));
        }

        let mut outside = Vec::new();
        for handle in handles {
            let note = handle.await.unwrap().unwrap();
            if note.parent().is_none() {
                outside.push(note.id().unwrap().to_string());
            }
        }
        assert_eq!(store.tags().await.unwrap().notes_for("#shared").len(), 256);

        store.delete_folder(&top).await.unwrap();

        let map = store.tags().await.unwrap();
        assert!(!map.tags.contains_key("#inside"));
        let mut shared = map.notes_for("#shared").to_vec();
        let mut remaining = map.notes_for("#outside").to_vec();
        shared.sort();
        remaining.sort();
        outside.sort();
        assert_eq!(shared, outside);
        assert_eq!(remaining, outside);
        let root = store.list_folder(None).await.unwrap();
        assert_eq!(root.len(), 56);
        assert!(root.iter().all(|d| d.is_note()));
    }

    #[tokio::test]
    async fn test_destroy_resets_store_and_remote() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_note("n", "#x", None).await.unwrap();
        store.set_remote_url("ws://localhost:5984").unwrap();

        store.destroy().await.unwrap();

        assert!(store.list_folder(None).await.unwrap().is_empty());
        assert!(store.tags().await.unwrap().tags.is_empty());
        assert_eq!(store.remote_url().unwrap(), None);
        assert!(store
            .local()
            .get(&design_doc_id(PARENT_FOLDER_VIEW))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_export_then_import_into_fresh_store() {
        let source = Store::open_in_memory().await.unwrap();
        let folder = source.create_folder("f", None).await.unwrap();
        source
            .create_note("n", "#tag", folder.id())
            .await
            .unwrap();
        let backup = source.export().await.unwrap();

        let target = Store::open_in_memory().await.unwrap();
        let outcomes = target.import(&backup).await;

        // The index definition already exists in the target
        let design = design_doc_id(PARENT_FOLDER_VIEW);
        for outcome in &outcomes {
            assert_eq!(outcome.succeeded, outcome.id != design, "{:?}", outcome);
        }
        assert_eq!(target.list_folder(folder.id()).await.unwrap().len(), 1);
        assert_eq!(target.notes_for_tag("#tag").await.unwrap().len(), 1);
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("Todo"), "#todo");
        assert_eq!(normalize_tag(" #Home "), "#home");
    }
}
