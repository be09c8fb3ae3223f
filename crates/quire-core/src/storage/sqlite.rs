//! SQLite document store
//!
//! Implements [`DocumentStore`] on a single SQLite connection. Every write
//! runs in one transaction that also refreshes the document's secondary
//! index rows, so a query issued after a write completes always sees it.
//!
//! ## Revisions
//!
//! Each document keeps one winning revision plus the list of its ancestors.
//! Deletes leave a tombstone so they replicate. Revisions that lose a
//! replication conflict are kept in the `conflicts` table until removed.
//!
//! ## Threading
//!
//! The connection lives behind a mutex; each primitive runs on the blocking
//! pool via `spawn_blocking`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

use super::adapter::{
    join_document, split_document, ChangeBatch, DocumentStore, PutResponse, ReplicatedDoc, Row,
    RowValue, ViewFn,
};
use super::error::{StoreError, StoreResult};
use super::revision::{self, extend_history, next_after, Revision};
use super::schema::{get_last_seq, get_replica_id, init_schema, needs_init, set_last_seq};
use super::views::{parent_folder_view, PARENT_FOLDER_VIEW};
use crate::sync::{Checkpoint, ReplicationHandle, ReplicationOptions};

/// Embedded document store backed by SQLite
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Connection>,
    views: RwLock<BTreeMap<String, ViewFn>>,
    updates: watch::Sender<u64>,
    replica_id: String,
    location: String,
}

/// Stored state of a document's winning revision
struct DocRow {
    rev: String,
    deleted: bool,
    body: Value,
    history: Vec<String>,
}

impl Inner {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn views(&self) -> Vec<(String, ViewFn)> {
        self.views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, view)| (name.clone(), view.clone()))
            .collect()
    }

    fn has_view(&self, name: &str) -> bool {
        self.views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn notify(&self, seq: i64) {
        self.updates.send_replace(seq.max(0) as u64);
    }
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn, path.display().to_string())
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, location: String) -> StoreResult<Self> {
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        let replica_id = get_replica_id(&conn)?;
        let seq = current_seq(&conn)?;

        let mut views = BTreeMap::new();
        views.insert(PARENT_FOLDER_VIEW.to_string(), parent_folder_view());
        let (updates, _) = watch::channel(seq as u64);

        let store = Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                views: RwLock::new(views),
                updates,
                replica_id,
                location,
            }),
        };

        // Rebuild in case the file was written by an older view definition
        {
            let mut conn = store.inner.conn();
            let tx = conn.transaction()?;
            rebuild_view(&tx, PARENT_FOLDER_VIEW, &parent_folder_view())?;
            tx.commit()?;
        }

        debug!(location = %store.inner.location, replica = %store.inner.replica_id, "Opened document store");
        Ok(store)
    }

    /// Stable identity of this replica
    pub fn replica_id(&self) -> &str {
        &self.inner.replica_id
    }

    /// Path of the database file, or `:memory:`
    pub fn location(&self) -> &str {
        &self.inner.location
    }

    /// Watch the update sequence; changes after every committed write
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.inner.updates.subscribe()
    }

    /// Current update sequence
    pub async fn update_seq(&self) -> StoreResult<u64> {
        self.blocking(|inner| Ok(current_seq(&inner.conn())? as u64))
            .await
    }

    /// Open a continuous replication session with a remote endpoint
    ///
    /// The caller owns event subscription on the returned handle.
    pub fn begin_replication(
        &self,
        remote_url: &str,
        options: ReplicationOptions,
    ) -> ReplicationHandle {
        crate::sync::spawn_replication(self.clone(), remote_url.to_string(), options)
    }

    // ==================== Replication ====================

    /// Documents written after `since`, in update order
    pub async fn changes_since(&self, since: u64, limit: usize) -> StoreResult<ChangeBatch> {
        self.blocking(move |inner| {
            let conn = inner.conn();
            let mut stmt = conn.prepare(
                "SELECT id, rev, seq, deleted, body, history FROM documents
                 WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![since as i64, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut docs = Vec::new();
            let mut last_seq = since;
            for row in rows {
                let (id, rev, seq, deleted, body, history) = row?;
                last_seq = last_seq.max(seq as u64);
                docs.push(ReplicatedDoc {
                    id,
                    rev,
                    deleted,
                    body: serde_json::from_str(&body)?,
                    history: serde_json::from_str(&history)?,
                });
            }

            let pending = docs.len() == limit;
            Ok(ChangeBatch {
                docs,
                last_seq,
                pending,
            })
        })
        .await
    }

    /// Merge revisions received from another replica
    ///
    /// Returns the number of documents whose stored state changed.
    pub async fn apply_changes(&self, docs: Vec<ReplicatedDoc>) -> StoreResult<usize> {
        self.blocking(move |inner| {
            let views = inner.views();
            let mut conn = inner.conn();
            let tx = conn.transaction()?;

            let mut written = 0;
            let mut last_seq = None;
            for doc in docs {
                if let Some(seq) = merge_revision(&tx, &views, doc)? {
                    written += 1;
                    last_seq = Some(seq);
                }
            }
            tx.commit()?;

            if let Some(seq) = last_seq {
                inner.notify(seq);
            }
            Ok(written)
        })
        .await
    }

    /// Replication progress recorded for a remote peer
    pub async fn load_checkpoint(&self, peer_id: &str) -> StoreResult<Checkpoint> {
        let peer_id = peer_id.to_string();
        self.blocking(move |inner| {
            let checkpoint = inner
                .conn()
                .query_row(
                    "SELECT pulled_seq, pushed_seq FROM checkpoints WHERE peer_id = ?1",
                    params![peer_id],
                    |row| {
                        Ok(Checkpoint {
                            pulled_seq: row.get::<_, i64>(0)? as u64,
                            pushed_seq: row.get::<_, i64>(1)? as u64,
                        })
                    },
                )
                .optional()?;
            Ok(checkpoint.unwrap_or_default())
        })
        .await
    }

    /// Persist replication progress for a remote peer
    pub async fn save_checkpoint(&self, peer_id: &str, checkpoint: Checkpoint) -> StoreResult<()> {
        let peer_id = peer_id.to_string();
        self.blocking(move |inner| {
            inner.conn().execute(
                "INSERT OR REPLACE INTO checkpoints (peer_id, pulled_seq, pushed_seq)
                 VALUES (?1, ?2, ?3)",
                params![
                    peer_id,
                    checkpoint.pulled_seq as i64,
                    checkpoint.pushed_seq as i64
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> StoreResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, id: &str) -> StoreResult<Value> {
        let id = id.to_string();
        self.blocking(move |inner| match load_row(&inner.conn(), &id)? {
            Some(row) if !row.deleted => Ok(join_document(&id, &row.rev, row.body)),
            _ => Err(StoreError::not_found(id)),
        })
        .await
    }

    async fn put(&self, doc: Value) -> StoreResult<PutResponse> {
        let (id, rev, body) = split_document(doc)?;
        let id = id.ok_or_else(|| {
            StoreError::InvalidDocument("put requires an _id; use post to create".to_string())
        })?;
        self.blocking(move |inner| write_document(inner, id, rev, body))
            .await
    }

    async fn post(&self, doc: Value) -> StoreResult<PutResponse> {
        let (_, _, body) = split_document(doc)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.blocking(move |inner| write_document(inner, id, None, body))
            .await
    }

    async fn remove(&self, id: &str, rev: &str) -> StoreResult<PutResponse> {
        let id = id.to_string();
        let rev = rev.to_string();
        self.blocking(move |inner| {
            let views = inner.views();
            let mut conn = inner.conn();
            let tx = conn.transaction()?;

            let Some(row) = load_row(&tx, &id)? else {
                return Err(StoreError::not_found(id));
            };

            if !row.deleted && row.rev == rev {
                let new_rev = next_after(&row.rev).to_string();
                let history = extend_history(row.history, row.rev);
                let seq = write_row(
                    &tx,
                    &views,
                    &id,
                    &new_rev,
                    true,
                    &Value::Object(Map::new()),
                    &history,
                )?;
                tx.commit()?;
                inner.notify(seq);
                debug!(%id, rev = %new_rev, "Removed document");
                return Ok(PutResponse {
                    ok: true,
                    id,
                    rev: new_rev,
                });
            }

            let dropped = tx.execute(
                "DELETE FROM conflicts WHERE id = ?1 AND rev = ?2",
                params![id, rev],
            )?;
            if dropped > 0 {
                tx.commit()?;
                debug!(%id, %rev, "Removed conflicting revision");
                return Ok(PutResponse {
                    ok: true,
                    id,
                    rev: next_after(&rev).to_string(),
                });
            }

            if row.deleted {
                Err(StoreError::not_found(id))
            } else {
                Err(StoreError::conflict(id))
            }
        })
        .await
    }

    async fn all_docs(&self) -> StoreResult<Vec<Row>> {
        self.blocking(|inner| {
            let conn = inner.conn();
            let mut stmt = conn
                .prepare("SELECT id, rev, body FROM documents WHERE deleted = 0 ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut result = Vec::new();
            for row in rows {
                let (id, rev, body) = row?;
                let doc = join_document(&id, &rev, serde_json::from_str(&body)?);
                result.push(Row {
                    key: Value::String(id.clone()),
                    id,
                    value: RowValue { rev },
                    doc,
                });
            }
            Ok(result)
        })
        .await
    }

    async fn query(&self, view: &str, key: Option<&str>) -> StoreResult<Vec<Row>> {
        if !self.inner.has_view(view) {
            return Err(StoreError::UnknownView(view.to_string()));
        }
        let view = view.to_string();
        let key = key.map(str::to_string);
        self.blocking(move |inner| {
            let conn = inner.conn();
            let mut stmt = conn.prepare(
                "SELECT d.id, d.rev, d.body, v.key FROM view_rows v
                 JOIN documents d ON d.id = v.doc_id
                 WHERE v.view = ?1 AND v.key IS ?2 AND d.deleted = 0
                 ORDER BY d.id",
            )?;
            let rows = stmt.query_map(params![view, key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;

            let mut result = Vec::new();
            for row in rows {
                let (id, rev, body, key) = row?;
                let doc = join_document(&id, &rev, serde_json::from_str(&body)?);
                result.push(Row {
                    id,
                    key: key.map(Value::String).unwrap_or(Value::Null),
                    value: RowValue { rev },
                    doc,
                });
            }
            Ok(result)
        })
        .await
    }

    async fn get_conflicts(&self, id: &str) -> StoreResult<Vec<String>> {
        let id = id.to_string();
        self.blocking(move |inner| {
            let conn = inner.conn();
            match load_row(&conn, &id)? {
                Some(row) if !row.deleted => {}
                _ => return Err(StoreError::not_found(id)),
            }

            let mut stmt = conn.prepare("SELECT rev FROM conflicts WHERE id = ?1")?;
            let mut revs = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            revs.sort_by(|a, b| revision::compare(b, a));
            Ok(revs)
        })
        .await
    }

    async fn register_view(&self, name: &str, map: ViewFn) -> StoreResult<()> {
        let name = name.to_string();
        self.inner
            .views
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), map.clone());

        self.blocking(move |inner| {
            let mut conn = inner.conn();
            let tx = conn.transaction()?;
            rebuild_view(&tx, &name, &map)?;
            tx.commit()?;
            debug!(view = %name, "Registered view");
            Ok(())
        })
        .await
    }

    async fn destroy(&self) -> StoreResult<()> {
        self.blocking(|inner| {
            inner.conn().execute_batch(
                "DELETE FROM documents;
                 DELETE FROM conflicts;
                 DELETE FROM view_rows;
                 DELETE FROM checkpoints;",
            )?;
            // The sequence keeps counting so peers pick up later writes
            let seq = current_seq(&inner.conn())?;
            inner.notify(seq);
            debug!(location = %inner.location, seq, "Destroyed all documents");
            Ok(())
        })
        .await
    }
}

/// Create or update a document inside its own transaction
fn write_document(
    inner: &Inner,
    id: String,
    rev: Option<String>,
    body: Map<String, Value>,
) -> StoreResult<PutResponse> {
    let views = inner.views();
    let mut conn = inner.conn();
    let tx = conn.transaction()?;

    let (new_rev, history) = match load_row(&tx, &id)? {
        None => (Revision::first(), Vec::new()),
        Some(row) if row.deleted => {
            if rev.as_ref().is_some_and(|r| *r != row.rev) {
                return Err(StoreError::conflict(id));
            }
            (next_after(&row.rev), extend_history(row.history, row.rev))
        }
        Some(row) => {
            if rev.as_deref() != Some(row.rev.as_str()) {
                return Err(StoreError::conflict(id));
            }
            (next_after(&row.rev), extend_history(row.history, row.rev))
        }
    };

    let new_rev = new_rev.to_string();
    let seq = write_row(
        &tx,
        &views,
        &id,
        &new_rev,
        false,
        &Value::Object(body),
        &history,
    )?;
    tx.commit()?;
    inner.notify(seq);

    debug!(%id, rev = %new_rev, "Stored document");
    Ok(PutResponse {
        ok: true,
        id,
        rev: new_rev,
    })
}

/// Merge one replicated revision; returns the new seq if anything changed
fn merge_revision(
    conn: &Connection,
    views: &[(String, ViewFn)],
    doc: ReplicatedDoc,
) -> StoreResult<Option<i64>> {
    let Some(local) = load_row(conn, &doc.id)? else {
        let seq = write_row(conn, views, &doc.id, &doc.rev, doc.deleted, &doc.body, &doc.history)?;
        return Ok(Some(seq));
    };

    if local.rev == doc.rev {
        return Ok(None);
    }

    // Incoming descends from what we have
    if doc.history.contains(&local.rev) {
        let seq = write_row(conn, views, &doc.id, &doc.rev, doc.deleted, &doc.body, &doc.history)?;
        return Ok(Some(seq));
    }

    // We already have it, or something newer
    if local.history.contains(&doc.rev) || conflict_exists(conn, &doc.id, &doc.rev)? {
        return Ok(None);
    }

    let incoming_wins = match (doc.deleted, local.deleted) {
        (false, true) => true,
        (true, false) => false,
        _ => revision::compare(&doc.rev, &local.rev) == Ordering::Greater,
    };

    if incoming_wins {
        if !local.deleted {
            insert_conflict(conn, &doc.id, &local.rev, &local.body)?;
        }
        let seq = write_row(conn, views, &doc.id, &doc.rev, doc.deleted, &doc.body, &doc.history)?;
        debug!(id = %doc.id, winner = %doc.rev, loser = %local.rev, "Replication conflict");
        Ok(Some(seq))
    } else if !doc.deleted {
        insert_conflict(conn, &doc.id, &doc.rev, &doc.body)?;
        debug!(id = %doc.id, winner = %local.rev, loser = %doc.rev, "Replication conflict");
        Ok(None)
    } else {
        Ok(None)
    }
}

fn load_row(conn: &Connection, id: &str) -> StoreResult<Option<DocRow>> {
    let raw = conn
        .query_row(
            "SELECT rev, deleted, body, history FROM documents WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    match raw {
        Some((rev, deleted, body, history)) => Ok(Some(DocRow {
            rev,
            deleted,
            body: serde_json::from_str(&body)?,
            history: serde_json::from_str(&history)?,
        })),
        None => Ok(None),
    }
}

fn current_seq(conn: &Connection) -> StoreResult<i64> {
    Ok(get_last_seq(conn)?)
}

fn write_row(
    conn: &Connection,
    views: &[(String, ViewFn)],
    id: &str,
    rev: &str,
    deleted: bool,
    body: &Value,
    history: &[String],
) -> StoreResult<i64> {
    let seq = current_seq(conn)? + 1;
    set_last_seq(conn, seq)?;
    conn.execute(
        "INSERT OR REPLACE INTO documents (id, rev, seq, deleted, body, history)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            rev,
            seq,
            deleted,
            serde_json::to_string(body)?,
            serde_json::to_string(history)?
        ],
    )?;

    conn.execute("DELETE FROM view_rows WHERE doc_id = ?1", params![id])?;
    if !deleted {
        let doc = join_document(id, rev, body.clone());
        for (name, view) in views {
            index_document(conn, name, view, id, &doc)?;
        }
    }
    Ok(seq)
}

fn index_document(
    conn: &Connection,
    name: &str,
    view: &ViewFn,
    id: &str,
    doc: &Value,
) -> StoreResult<()> {
    for key in view(doc) {
        conn.execute(
            "INSERT INTO view_rows (view, key, doc_id) VALUES (?1, ?2, ?3)",
            params![name, key, id],
        )?;
    }
    Ok(())
}

fn rebuild_view(conn: &Connection, name: &str, view: &ViewFn) -> StoreResult<()> {
    conn.execute("DELETE FROM view_rows WHERE view = ?1", params![name])?;

    let mut stmt = conn.prepare("SELECT id, rev, body FROM documents WHERE deleted = 0")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    for row in rows {
        let (id, rev, body) = row?;
        let doc = join_document(&id, &rev, serde_json::from_str(&body)?);
        index_document(conn, name, view, &id, &doc)?;
    }
    Ok(())
}

fn conflict_exists(conn: &Connection, id: &str, rev: &str) -> StoreResult<bool> {
    Ok(conn
        .prepare("SELECT 1 FROM conflicts WHERE id = ?1 AND rev = ?2")?
        .exists(params![id, rev])?)
}

fn insert_conflict(conn: &Connection, id: &str, rev: &str, body: &Value) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO conflicts (id, rev, body) VALUES (?1, ?2, ?3)",
        params![id, rev, serde_json::to_string(body)?],
    )?;
    Ok(())
}
