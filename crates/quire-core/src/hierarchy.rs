//! Folder hierarchy engine
//!
//! Structural operations over the folder tree, built only on the store
//! primitives: deleting a folder with everything beneath it, and sweeping
//! the store for documents whose parent folder no longer exists.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{try_join_all, BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::Document;
use crate::storage::{DocumentStore, DocumentStoreExt, Row, StoreResult};

/// Receives notice of deletions performed by the hierarchy engine
#[async_trait]
pub trait DeletionObserver: Send + Sync {
    /// Called before a folder's subtree is removed, while it is still intact
    async fn folder_deleting(&self, folder: &Document) -> StoreResult<()>;

    /// Called after a note has been removed
    async fn note_deleted(&self, note: &Document) -> StoreResult<()>;
}

/// Documents removed by an orphan sweep
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    /// Orphaned folders (their subtrees were removed too)
    pub folders: Vec<String>,
    pub notes: Vec<String>,
}

impl OrphanReport {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.notes.is_empty()
    }

    pub fn total(&self) -> usize {
        self.folders.len() + self.notes.len()
    }
}

/// Structural operations on the folder tree
#[derive(Clone)]
pub struct FolderHierarchy {
    store: Arc<dyn DocumentStore>,
    observer: Option<Arc<dyn DeletionObserver>>,
}

impl FolderHierarchy {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            observer: None,
        }
    }

    /// Notify an observer of every deletion
    pub fn with_observer(mut self, observer: Arc<dyn DeletionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Delete a folder and every document beneath it
    ///
    /// A folder without an id is ignored. Sibling branches are removed
    /// concurrently; each folder is removed only after all of its children.
    /// Documents already gone are skipped, so a failed deletion can simply
    /// be run again.
    ///
    /// The observer is told before anything is removed, since the subtree
    /// can only be walked while it is intact. If a removal then fails (a
    /// stale revision gives a conflict), notes that survive are already
    /// missing from the observer's view until the deletion is rerun or the
    /// notes are saved again.
    pub async fn delete_folder_subtree(&self, folder: &Document) -> StoreResult<()> {
        let Some(folder_id) = folder.id() else {
            warn!("Ignoring subtree deletion for a folder without an id");
            return Ok(());
        };

        if let Some(observer) = &self.observer {
            observer.folder_deleting(folder).await?;
        }

        if let Err(err) = self
            .remove_subtree(folder_id.to_string(), folder.rev.clone())
            .await
        {
            warn!(
                folder = %folder_id,
                error = %err,
                "Folder subtree only partly deleted; rerun to finish"
            );
            return Err(err);
        }
        info!(folder = %folder_id, "Deleted folder subtree");
        Ok(())
    }

    /// Remove a single note and notify the observer
    pub async fn delete_note(&self, note: &Document) -> StoreResult<()> {
        let Some(note_id) = note.id() else {
            warn!("Ignoring deletion of a note without an id");
            return Ok(());
        };

        let rev = match &note.rev {
            Some(rev) => Some(rev.clone()),
            None => self.current_rev(note_id).await?,
        };
        if let Some(rev) = rev {
            self.remove_tolerant(note_id, &rev).await?;
        }

        if let Some(observer) = &self.observer {
            observer.note_deleted(note).await?;
        }
        debug!(note = %note_id, "Deleted note");
        Ok(())
    }

    /// Remove every document whose parent folder does not exist
    ///
    /// All parent checks settle before the first removal. Orphaned folders
    /// take their subtree with them.
    pub async fn clean_orphans(&self) -> StoreResult<OrphanReport> {
        let snapshot = self.store.all_docs().await?;

        let checks = snapshot
            .iter()
            .filter(|row| row.is_note() || row.is_folder())
            .filter_map(|row| row.parent_folder_id().map(|parent| (row, parent)))
            .map(|(row, parent)| self.orphan_check(row, parent));
        let orphans: Vec<&Row> = try_join_all(checks).await?.into_iter().flatten().collect();

        let mut report = OrphanReport::default();
        for row in orphans {
            let doc: Document = row.parse()?;
            if doc.is_folder() {
                self.delete_folder_subtree(&doc).await?;
                report.folders.push(row.id.clone());
            } else {
                self.delete_note(&doc).await?;
                report.notes.push(row.id.clone());
            }
        }

        info!(
            folders = report.folders.len(),
            notes = report.notes.len(),
            "Removed orphaned documents"
        );
        Ok(report)
    }

    async fn orphan_check<'a>(&self, row: &'a Row, parent: &str) -> StoreResult<Option<&'a Row>> {
        match self.store.get(parent).await {
            Ok(_) => Ok(None),
            Err(err) if err.is_not_found() => {
                debug!(id = %row.id, parent = %parent, "Found orphan");
                Ok(Some(row))
            }
            Err(err) => Err(err),
        }
    }

    fn remove_subtree(
        &self,
        folder_id: String,
        rev: Option<String>,
    ) -> BoxFuture<'_, StoreResult<()>> {
        async move {
            let children = self.store.query_by_parent(Some(&folder_id)).await?;
            let (folders, notes): (Vec<Row>, Vec<Row>) =
                children.into_iter().partition(Row::is_folder);

            let note_removals = notes
                .iter()
                .filter(|row| row.is_note())
                .map(|row| self.remove_tolerant(&row.id, row.rev()));
            let branches = folders
                .iter()
                .map(|row| self.remove_subtree(row.id.clone(), Some(row.rev().to_string())));
            tokio::try_join!(try_join_all(note_removals), try_join_all(branches))?;

            let rev = match rev {
                Some(rev) => rev,
                None => match self.current_rev(&folder_id).await? {
                    Some(rev) => rev,
                    None => return Ok(()),
                },
            };
            self.remove_tolerant(&folder_id, &rev).await
        }
        .boxed()
    }

    async fn current_rev(&self, id: &str) -> StoreResult<Option<String>> {
        match self.store.get(id).await {
            Ok(doc) => Ok(doc
                .get("_rev")
                .and_then(|rev| rev.as_str())
                .map(str::to_string)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Remove a document, treating an already-removed one as success
    async fn remove_tolerant(&self, id: &str, rev: &str) -> StoreResult<()> {
        match self.store.remove(id, rev).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(%id, "Already removed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PutResponse, SqliteStore, StoreError, ViewFn};
    use crate::tags::TagIndex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct Fixture {
        store: Arc<SqliteStore>,
        tags: TagIndex,
        hierarchy: FolderHierarchy,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tags = TagIndex::new(store.clone());
        let hierarchy = FolderHierarchy::new(store.clone()).with_observer(Arc::new(tags.clone()));
        Fixture {
            store,
            tags,
            hierarchy,
        }
    }

    impl Fixture {
        async fn folder(&self, id: &str, parent: Option<&str>) -> Document {
            let doc = Document::folder(id, parent.map(str::to_string)).with_id(id);
            self.save(doc).await
        }

        async fn note(&self, id: &str, body: &str, parent: Option<&str>) -> Document {
            let doc = Document::note(id, body, parent.map(str::to_string)).with_id(id);
            let doc = self.save(doc).await;
            self.tags.save_note(&doc).await.unwrap();
            doc
        }

        async fn save(&self, mut doc: Document) -> Document {
            let res = self.store.put_as(&doc).await.unwrap();
            doc.rev = Some(res.rev);
            doc
        }

        async fn exists(&self, id: &str) -> bool {
            self.store.get(id).await.is_ok()
        }
    }

    #[tokio::test]
    async fn test_delete_subtree_removes_everything_below() {
        let fx = fixture();
        let root = fx.folder("root", None).await;
        fx.folder("sub", Some("root")).await;
        fx.folder("subsub", Some("sub")).await;
        fx.note("n1", "#keep #gone", Some("root")).await;
        fx.note("n2", "#gone", Some("sub")).await;
        fx.note("n3", "#gone", Some("subsub")).await;
        fx.folder("other", None).await;
        fx.note("n4", "#keep", Some("other")).await;

        fx.hierarchy.delete_folder_subtree(&root).await.unwrap();

        for id in ["root", "sub", "subsub", "n1", "n2", "n3"] {
            assert!(!fx.exists(id).await, "{} should be deleted", id);
        }
        assert!(fx.exists("other").await);
        assert!(fx.exists("n4").await);

        let map = fx.tags.get_map().await.unwrap();
        assert!(!map.tags.contains_key("#gone"));
        assert_eq!(map.notes_for("#keep"), ["n4".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_subtree_without_id_is_noop() {
        let fx = fixture();
        fx.folder("f1", None).await;

        let unsaved = Document::folder("unsaved", None);
        fx.hierarchy.delete_folder_subtree(&unsaved).await.unwrap();

        assert_eq!(fx.store.all_docs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_subtree_is_rerunnable() {
        let fx = fixture();
        let root = fx.folder("root", None).await;
        let child = fx.note("n1", "text", Some("root")).await;

        // A child removed out from under the sweep is tolerated
        fx.store
            .remove("n1", child.rev.as_deref().unwrap())
            .await
            .unwrap();
        fx.hierarchy.delete_folder_subtree(&root).await.unwrap();
        assert!(!fx.exists("root").await);

        // Running again on the same (now removed) folder succeeds
        fx.hierarchy.delete_folder_subtree(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_subtree_with_stale_revision_conflicts() {
        let fx = fixture();
        let stale = fx.folder("root", None).await;

        let mut renamed = stale.clone();
        renamed.set_display_name("Renamed");
        fx.store.put_as(&renamed).await.unwrap();

        let err = fx.hierarchy.delete_folder_subtree(&stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(fx.exists("root").await);
    }

    #[tokio::test]
    async fn test_delete_subtree_fetches_missing_revision() {
        let fx = fixture();
        fx.folder("root", None).await;
        fx.note("n1", "", Some("root")).await;

        let by_id = Document::folder("root", None).with_id("root");
        fx.hierarchy.delete_folder_subtree(&by_id).await.unwrap();

        assert!(!fx.exists("root").await);
        assert!(!fx.exists("n1").await);
    }

    #[tokio::test]
    async fn test_delete_note_purges_tags() {
        let fx = fixture();
        let n = fx.note("n1", "#solo", None).await;

        fx.hierarchy.delete_note(&n).await.unwrap();

        assert!(!fx.exists("n1").await);
        assert!(fx.tags.get_map().await.unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn test_clean_orphans() {
        let fx = fixture();
        fx.folder("home", None).await;
        fx.note("kept", "#ok", Some("home")).await;
        fx.note("root-note", "", None).await;

        // Orphans point at a folder that never existed
        fx.note("lost-note", "#lost", Some("ghost")).await;
        fx.folder("lost-folder", Some("ghost")).await;
        fx.folder("lost-child", Some("lost-folder")).await;
        fx.note("lost-grandchild", "#lost", Some("lost-child")).await;

        let report = fx.hierarchy.clean_orphans().await.unwrap();
        assert_eq!(report.notes, vec!["lost-note".to_string()]);
        assert_eq!(report.folders, vec!["lost-folder".to_string()]);
        assert_eq!(report.total(), 2);

        for id in ["home", "kept", "root-note"] {
            assert!(fx.exists(id).await, "{} should survive", id);
        }
        for id in ["lost-note", "lost-folder", "lost-child", "lost-grandchild"] {
            assert!(!fx.exists(id).await, "{} should be removed", id);
        }

        let map = fx.tags.get_map().await.unwrap();
        assert!(!map.tags.contains_key("#lost"));
        assert!(map.contains("#ok", "kept"));

        // Nothing left to clean
        assert!(fx.hierarchy.clean_orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clean_orphans_ignores_empty_parent() {
        let fx = fixture();
        fx.store
            .put(serde_json::json!({"_id": "n1", "type": "note", "parentFolderID": ""}))
            .await
            .unwrap();

        assert!(fx.hierarchy.clean_orphans().await.unwrap().is_empty());
        assert!(fx.exists("n1").await);
    }

    /// Fails the first removal of one document with a conflict
    struct FailingRemoveStore {
        inner: SqliteStore,
        fail_id: &'static str,
        failed: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for FailingRemoveStore {
        async fn get(&self, id: &str) -> StoreResult<Value> {
            self.inner.get(id).await
        }

        async fn put(&self, doc: Value) -> StoreResult<PutResponse> {
            self.inner.put(doc).await
        }

        async fn post(&self, doc: Value) -> StoreResult<PutResponse> {
            self.inner.post(doc).await
        }

        async fn remove(&self, id: &str, rev: &str) -> StoreResult<PutResponse> {
            if id == self.fail_id && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::conflict(id));
            }
            self.inner.remove(id, rev).await
        }

        async fn all_docs(&self) -> StoreResult<Vec<Row>> {
            self.inner.all_docs().await
        }

        async fn query(&self, view: &str, key: Option<&str>) -> StoreResult<Vec<Row>> {
            self.inner.query(view, key).await
        }

        async fn get_conflicts(&self, id: &str) -> StoreResult<Vec<String>> {
            self.inner.get_conflicts(id).await
        }

        async fn register_view(&self, name: &str, map: ViewFn) -> StoreResult<()> {
            self.inner.register_view(name, map).await
        }

        async fn destroy(&self) -> StoreResult<()> {
            self.inner.destroy().await
        }
    }

    #[tokio::test]
    async fn test_failed_subtree_delete_leaves_tags_purged_until_rerun() {
        let store = Arc::new(FailingRemoveStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_id: "stuck",
            failed: AtomicBool::new(false),
        });
        let tags = TagIndex::new(store.clone());
        let hierarchy = FolderHierarchy::new(store.clone()).with_observer(Arc::new(tags.clone()));

        let mut root = Document::folder("root", None).with_id("root");
        root.rev = Some(store.put_as(&root).await.unwrap().rev);
        for id in ["stuck", "loose"] {
            let note = Document::note(id, "#inside", Some("root".to_string())).with_id(id);
            store.put_as(&note).await.unwrap();
            tags.save_note(&note).await.unwrap();
        }

        let err = hierarchy.delete_folder_subtree(&root).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(store.get("stuck").await.is_ok());
        assert!(store.get("root").await.is_ok());
        assert!(!tags.get_map().await.unwrap().tags.contains_key("#inside"));

        hierarchy.delete_folder_subtree(&root).await.unwrap();
        for id in ["root", "stuck", "loose"] {
            assert!(store.get(id).await.unwrap_err().is_not_found());
        }
    }

    /// Records the order of observer callbacks
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeletionObserver for Recorder {
        async fn folder_deleting(&self, folder: &Document) -> StoreResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("folder:{}", folder.id().unwrap_or_default()));
            Ok(())
        }

        async fn note_deleted(&self, note: &Document) -> StoreResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("note:{}", note.id().unwrap_or_default()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_observer_sees_intact_tree() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let recorder = Arc::new(Recorder::default());
        let hierarchy = FolderHierarchy::new(store.clone()).with_observer(recorder.clone());

        let res = store
            .put_as(&Document::folder("f", None).with_id("f"))
            .await
            .unwrap();
        let mut folder = Document::folder("f", None).with_id("f");
        folder.rev = Some(res.rev);

        hierarchy.delete_folder_subtree(&folder).await.unwrap();
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["folder:f".to_string()]);
    }
}
