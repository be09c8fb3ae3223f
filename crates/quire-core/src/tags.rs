//! Tag index engine
//!
//! Maintains the singleton `tagMap` document, an inverted index from
//! lowercase hashtag to the ids of the notes whose body contains it.
//!
//! The map is shared by every writer and never locked. Each update is a
//! read-modify-write cycle guarded by the store's revision check; a conflict
//! means another writer got there first, so the cycle re-reads the map and
//! reapplies the same per-note delta. Deltas for distinct notes commute, so
//! the order in which concurrent writers land does not matter. Retries back
//! off for a random, growing delay so a crowd of writers spreads out.

use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use regex::Regex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::hierarchy::DeletionObserver;
use crate::models::{Document, TagMap, TAG_MAP_ID};
use crate::storage::{DocumentStore, DocumentStoreExt, StoreError, StoreResult};

/// Default number of attempts per tag map update
pub const DEFAULT_CONFLICT_RETRIES: u32 = 16;

/// Upper bound of the first retry delay; doubles per attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(2);

/// Cap on the random retry delay
const RETRY_MAX_DELAY: Duration = Duration::from_millis(250);

/// `#` after start of text, a space, a newline or `>`, up to the next
/// space, newline or `<`
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^| |\n|>)(#[^ <\n]+)").expect("tag pattern is a valid regex")
});

/// HTML entity fragments that look like tags
const ENTITY_PREFIXES: [&str; 2] = ["#39;", "#34;"];

/// Extract hashtags from note text
///
/// Tags are lowercased; duplicates are kept in order of appearance.
pub fn extract_tags(text: &str) -> Vec<String> {
    TAG_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .filter(|tag| !ENTITY_PREFIXES.iter().any(|p| tag.starts_with(p)))
        .collect()
}

/// Notifications emitted by the tag index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagEvent {
    /// The tag map was written
    TagsUpdated,
}

impl TagEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagEvent::TagsUpdated => "tagsUpdated",
        }
    }
}

type PendingBranches = Arc<Mutex<Vec<JoinHandle<StoreResult<Vec<String>>>>>>;

/// Keeps the tag map consistent with note contents
#[derive(Clone)]
pub struct TagIndex {
    store: Arc<dyn DocumentStore>,
    events: broadcast::Sender<TagEvent>,
    max_attempts: u32,
}

impl TagIndex {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            events,
            max_attempts: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Set the number of attempts per update; 1 fails on the first conflict
    pub fn with_conflict_retries(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Subscribe to tag map updates
    pub fn subscribe(&self) -> broadcast::Receiver<TagEvent> {
        self.events.subscribe()
    }

    /// Read the tag map; NotFound until the first tagged note is saved
    pub async fn get_map(&self) -> StoreResult<TagMap> {
        self.store.get_as(TAG_MAP_ID).await
    }

    /// Re-index a saved note
    ///
    /// Drops the note from every entry, then lists it under each tag found
    /// in its body.
    pub async fn save_note(&self, note: &Document) -> StoreResult<()> {
        let Some(note_id) = note.id() else {
            warn!("Skipping tag indexing for a note without an id");
            return Ok(());
        };

        self.remove_note_id(note_id).await?;

        let tags = extract_tags(note.body().unwrap_or_default());
        if tags.is_empty() {
            return Ok(());
        }

        self.update(|map| map.add(note_id, &tags)).await?;
        info!(note = %note_id, tags = ?tags, "Indexed note tags");
        Ok(())
    }

    /// Drop a note from the tag map
    ///
    /// A note already absent from every entry causes no write.
    pub async fn delete_note(&self, note: &Document) -> StoreResult<()> {
        match note.id() {
            Some(note_id) => self.remove_note_id(note_id).await.map(|_| ()),
            None => {
                warn!("Skipping tag removal for a note without an id");
                Ok(())
            }
        }
    }

    /// Drop every note under a folder (at any depth) from the tag map
    ///
    /// Only the tag map is written; the documents themselves are left for
    /// the hierarchy engine. Every descendant note is collected first and
    /// removed with a single tag map update.
    pub async fn delete_folder(&self, folder: &Document) -> StoreResult<()> {
        let Some(folder_id) = folder.id() else {
            warn!("Skipping tag removal for a folder without an id");
            return Ok(());
        };

        let note_ids = self.collect_subtree_notes(folder_id).await?;
        if note_ids.is_empty() {
            debug!(folder = %folder_id, "No notes under folder");
            return Ok(());
        }

        let written = self.update(|map| map.remove_ids(&note_ids)).await?;
        debug!(
            folder = %folder_id,
            notes = note_ids.len(),
            written,
            "Removed folder subtree from tag map"
        );
        Ok(())
    }

    /// Ids of every note beneath a folder, at any depth
    ///
    /// Folder branches are discovered while the walk is running, so
    /// completion waits until a pass over the pending branch list finds it
    /// empty.
    async fn collect_subtree_notes(&self, folder_id: &str) -> StoreResult<Vec<String>> {
        let pending: PendingBranches = Arc::new(Mutex::new(Vec::new()));
        self.spawn_branch(folder_id.to_string(), &pending);

        let mut note_ids = Vec::new();
        let mut branches = 0;
        loop {
            let wave = std::mem::take(&mut *lock_pending(&pending));
            if wave.is_empty() {
                break;
            }
            branches += wave.len();

            for result in join_all(wave).await {
                match result.map_err(StoreError::from).and_then(|r| r) {
                    Ok(ids) => note_ids.extend(ids),
                    Err(err) => {
                        for handle in lock_pending(&pending).drain(..) {
                            handle.abort();
                        }
                        return Err(err);
                    }
                }
            }
        }

        debug!(folder = %folder_id, branches, notes = note_ids.len(), "Walked folder subtree");
        Ok(note_ids)
    }

    fn spawn_branch(&self, folder_id: String, pending: &PendingBranches) {
        let index = self.clone();
        let queue = pending.clone();
        let handle = tokio::spawn(async move { index.visit_folder(folder_id, queue).await });
        lock_pending(pending).push(handle);
    }

    /// Queue child folders and return the ids of child notes
    async fn visit_folder(
        &self,
        folder_id: String,
        pending: PendingBranches,
    ) -> StoreResult<Vec<String>> {
        let children = self.store.query_by_parent(Some(&folder_id)).await?;

        let mut notes = Vec::new();
        for row in children {
            if row.is_folder() {
                self.spawn_branch(row.id, &pending);
            } else if row.is_note() {
                notes.push(row.id);
            }
        }
        Ok(notes)
    }

    async fn remove_note_id(&self, note_id: &str) -> StoreResult<bool> {
        self.update(|map| map.remove_id(note_id)).await
    }

    /// Apply a delta to the tag map, retrying on revision conflicts
    ///
    /// The delta returns false when it left the map unchanged, in which case
    /// nothing is written. Returns whether a write happened.
    async fn update<F>(&self, mut apply: F) -> StoreResult<bool>
    where
        F: FnMut(&mut TagMap) -> bool + Send,
    {
        let mut attempt = 1;
        loop {
            let mut map = match self.get_map().await {
                Ok(map) => map,
                Err(err) if err.is_not_found() => TagMap::default(),
                Err(err) => return Err(err),
            };

            if !apply(&mut map) {
                return Ok(false);
            }

            match self.store.put_as(&map).await {
                Ok(_) => {
                    // No receivers is fine
                    let _ = self.events.send(TagEvent::TagsUpdated);
                    return Ok(true);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = retry_delay(attempt);
                    debug!(attempt, ?delay, "Tag map changed concurrently, retrying");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Random delay before retry `attempt`, drawn from a window that doubles
/// each attempt up to [`RETRY_MAX_DELAY`]
fn retry_delay(attempt: u32) -> Duration {
    let window = RETRY_BASE_DELAY
        .saturating_mul(1u32 << attempt.min(16))
        .min(RETRY_MAX_DELAY);
    let micros = window.as_micros() as u64;
    Duration::from_micros(rand::random::<u64>() % (micros + 1))
}

fn lock_pending(
    pending: &PendingBranches,
) -> std::sync::MutexGuard<'_, Vec<JoinHandle<StoreResult<Vec<String>>>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl DeletionObserver for TagIndex {
    async fn folder_deleting(&self, folder: &Document) -> StoreResult<()> {
        self.delete_folder(folder).await
    }

    async fn note_deleted(&self, note: &Document) -> StoreResult<()> {
        self.delete_note(note).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PutResponse, Row, SqliteStore, ViewFn};
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn index() -> (Arc<SqliteStore>, TagIndex) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let index = TagIndex::new(store.clone());
        (store, index)
    }

    async fn put_doc(store: &SqliteStore, doc: Document) -> Document {
        let res = store.put_as(&doc).await.unwrap();
        let mut doc = doc;
        doc.id = Some(res.id);
        doc.rev = Some(res.rev);
        doc
    }

    async fn note(store: &SqliteStore, id: &str, body: &str, parent: Option<&str>) -> Document {
        put_doc(
            store,
            Document::note(id, body, parent.map(str::to_string)).with_id(id),
        )
        .await
    }

    async fn folder(store: &SqliteStore, id: &str, parent: Option<&str>) -> Document {
        put_doc(
            store,
            Document::folder(id, parent.map(str::to_string)).with_id(id),
        )
        .await
    }

    #[test]
    fn test_extract_tags_lowercases_and_keeps_duplicates() {
        assert_eq!(
            extract_tags("hello #World and #world again"),
            vec!["#world", "#world"]
        );
    }

    #[test]
    fn test_extract_tags_none() {
        assert!(extract_tags("no tags here").is_empty());
        assert!(extract_tags("").is_empty());
    }

    #[test]
    fn test_extract_tags_boundaries() {
        assert_eq!(extract_tags("#start mid#dle"), vec!["#start"]);
        assert_eq!(extract_tags("line\n#next"), vec!["#next"]);
        assert_eq!(extract_tags("<p>#html</p>"), vec!["#html"]);
        assert_eq!(extract_tags("a #one #two"), vec!["#one", "#two"]);
    }

    #[test]
    fn test_extract_tags_skips_entities() {
        assert_eq!(extract_tags("it #39;s #34;quoted #real"), vec!["#real"]);
    }

    #[tokio::test]
    async fn test_save_note_round_trip() {
        let (store, index) = index();
        let n = note(&store, "n1", "buy milk #todo #home", None).await;

        index.save_note(&n).await.unwrap();
        let map = index.get_map().await.unwrap();
        assert_eq!(map.notes_for("#todo"), ["n1".to_string()]);
        assert_eq!(map.notes_for("#home"), ["n1".to_string()]);

        index.delete_note(&n).await.unwrap();
        let map = index.get_map().await.unwrap();
        assert!(!map.tags.contains_key("#todo"));
        assert!(!map.tags.contains_key("#home"));
    }

    #[tokio::test]
    async fn test_save_note_replaces_previous_tags() {
        let (store, index) = index();
        let mut n = note(&store, "n1", "#a #b", None).await;
        index.save_note(&n).await.unwrap();

        n.set_body("#b #c");
        index.save_note(&n).await.unwrap();

        let map = index.get_map().await.unwrap();
        assert!(!map.tags.contains_key("#a"));
        assert!(map.contains("#b", "n1"));
        assert!(map.contains("#c", "n1"));
    }

    #[tokio::test]
    async fn test_save_without_tags_creates_nothing() {
        let (store, index) = index();
        let n = note(&store, "n1", "plain text", None).await;

        index.save_note(&n).await.unwrap();
        assert!(index.get_map().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_note_twice_is_noop() {
        let (store, index) = index();
        let n1 = note(&store, "n1", "#shared", None).await;
        let n2 = note(&store, "n2", "#shared", None).await;
        index.save_note(&n1).await.unwrap();
        index.save_note(&n2).await.unwrap();

        index.delete_note(&n1).await.unwrap();
        let after_first = index.get_map().await.unwrap();

        index.delete_note(&n1).await.unwrap();
        let after_second = index.get_map().await.unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(after_second.notes_for("#shared"), ["n2".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_note_without_map() {
        let (store, index) = index();
        let n = note(&store, "n1", "#x", None).await;
        index.delete_note(&n).await.unwrap();
        assert!(index.get_map().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_events_fire_on_write() {
        let (store, index) = index();
        let mut events = index.subscribe();
        let n = note(&store, "n1", "#event", None).await;

        index.save_note(&n).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), TagEvent::TagsUpdated);
        assert_eq!(TagEvent::TagsUpdated.as_str(), "tagsUpdated");
    }

    #[tokio::test]
    async fn test_concurrent_saves_converge() {
        let (store, index) = index();
        let mut notes = Vec::new();
        for i in 0..8 {
            notes.push(note(&store, &format!("n{}", i), "#busy", None).await);
        }

        let saves = notes.iter().map(|n| index.save_note(n));
        futures_util::future::try_join_all(saves).await.unwrap();

        let map = index.get_map().await.unwrap();
        assert_eq!(map.notes_for("#busy").len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_spawned_saves_converge_on_thread_pool() {
        let (_store, index) = index();

        let mut handles = Vec::new();
        for i in 0..256 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                let tag = if i % 2 == 0 { "#even" } else { "#odd" };
                let n = Document::note("t", &format!("{} #all", tag), None)
                    .with_id(&format!("n{}", i));
                index.save_note(&n).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let map = index.get_map().await.unwrap();
        assert_eq!(map.tags.len(), 3);
        assert_eq!(map.notes_for("#all").len(), 256);
        assert_eq!(map.notes_for("#even").len(), 128);
        assert_eq!(map.notes_for("#odd").len(), 128);
        assert!(map.contains("#odd", "n255"));
    }

    #[test]
    fn test_retry_delay_window_grows_and_caps() {
        for _ in 0..100 {
            assert!(retry_delay(1) <= RETRY_BASE_DELAY * 2);
            assert!(retry_delay(3) <= RETRY_BASE_DELAY * 8);
            assert!(retry_delay(40) <= RETRY_MAX_DELAY);
        }
    }

    #[tokio::test]
    async fn test_delete_folder_reaches_deepest_notes() {
        let (store, index) = index();
        let root = folder(&store, "root", None).await;
        folder(&store, "a", Some("root")).await;
        folder(&store, "b", Some("root")).await;
        folder(&store, "a1", Some("a")).await;
        folder(&store, "a1x", Some("a1")).await;

        let mut tagged = Vec::new();
        for (id, parent) in [
            ("n-root", "root"),
            ("n-a", "a"),
            ("n-b", "b"),
            ("n-a1", "a1"),
            ("n-deep", "a1x"),
        ] {
            tagged.push(note(&store, id, "#work", Some(parent)).await);
        }
        let outside = note(&store, "n-out", "#work", None).await;
        for n in tagged.iter().chain(std::iter::once(&outside)) {
            index.save_note(n).await.unwrap();
        }

        index.delete_folder(&root).await.unwrap();

        let map = index.get_map().await.unwrap();
        assert_eq!(map.notes_for("#work"), ["n-out".to_string()]);

        // Documents are left in place
        assert!(store.get("n-deep").await.is_ok());
        assert!(store.get("a1x").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_delete_wide_folder_writes_map_once() {
        let (store, index) = index();
        let root = folder(&store, "root", None).await;
        for i in 0..200 {
            let branch = format!("f{}", i);
            folder(&store, &branch, Some("root")).await;
            let n = note(&store, &format!("n{}", i), "#wide", Some(&branch)).await;
            index.save_note(&n).await.unwrap();
        }
        let keep = note(&store, "keep", "#wide #kept", None).await;
        index.save_note(&keep).await.unwrap();

        let mut events = index.subscribe();
        index.delete_folder(&root).await.unwrap();

        assert_eq!(events.try_recv().unwrap(), TagEvent::TagsUpdated);
        assert!(events.try_recv().is_err());

        let map = index.get_map().await.unwrap();
        assert_eq!(map.notes_for("#wide"), ["keep".to_string()]);
        assert_eq!(map.notes_for("#kept"), ["keep".to_string()]);
        assert_eq!(map.tags.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_folder_without_notes_skips_write() {
        let (store, index) = index();
        let root = folder(&store, "root", None).await;
        folder(&store, "empty", Some("root")).await;
        let n = note(&store, "n1", "#x", None).await;
        index.save_note(&n).await.unwrap();
        let before = index.get_map().await.unwrap();

        index.delete_folder(&root).await.unwrap();
        assert_eq!(index.get_map().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_folder_without_id_is_noop() {
        let (_store, index) = index();
        index
            .delete_folder(&Document::folder("unsaved", None))
            .await
            .unwrap();
    }

    /// Fails the first `conflicts` writes to the tag map with a conflict
    struct ConflictingStore {
        inner: SqliteStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl DocumentStore for ConflictingStore {
        async fn get(&self, id: &str) -> StoreResult<Value> {
            self.inner.get(id).await
        }

        async fn put(&self, doc: Value) -> StoreResult<PutResponse> {
            if doc["_id"] == TAG_MAP_ID
                && self
                    .conflicts
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StoreError::conflict(TAG_MAP_ID));
            }
            self.inner.put(doc).await
        }

        async fn post(&self, doc: Value) -> StoreResult<PutResponse> {
            self.inner.post(doc).await
        }

        async fn remove(&self, id: &str, rev: &str) -> StoreResult<PutResponse> {
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

    fn conflicting(conflicts: u32) -> Arc<ConflictingStore> {
        Arc::new(ConflictingStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            conflicts: AtomicU32::new(conflicts),
        })
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let store = conflicting(3);
        let index = TagIndex::new(store.clone());
        let n = Document::note("t", "#retry", None).with_id("n1");

        index.save_note(&n).await.unwrap();
        assert!(index.get_map().await.unwrap().contains("#retry", "n1"));
    }

    #[tokio::test]
    async fn test_single_attempt_fails_on_conflict() {
        let store = conflicting(1);
        let index = TagIndex::new(store.clone()).with_conflict_retries(1);
        let n = Document::note("t", "#retry", None).with_id("n1");

        let err = index.save_note(&n).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = conflicting(10);
        let index = TagIndex::new(store.clone()).with_conflict_retries(4);
        let n = Document::note("t", "#retry", None).with_id("n1");

        assert!(index.save_note(&n).await.unwrap_err().is_conflict());
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 6);
    }
}
