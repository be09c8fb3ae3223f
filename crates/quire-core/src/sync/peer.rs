//! Replication endpoints
//!
//! Anything that exposes a change feed and accepts replicated revisions can
//! take part in replication: the local SQLite store, another database file,
//! or a server reached over WebSocket.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::client::WebSocketPeer;
use crate::storage::{ChangeBatch, ReplicatedDoc, SqliteStore, StoreResult};

/// One side of a replication
#[async_trait]
pub trait ReplicaPeer: Send + Sync {
    /// Stable id used to key checkpoints
    fn peer_id(&self) -> &str;

    /// Changes after `since`, at most `limit` documents
    async fn changes_since(&self, since: u64, limit: usize) -> StoreResult<ChangeBatch>;

    /// Merge revisions, returning how many documents changed
    async fn apply_changes(&self, docs: Vec<ReplicatedDoc>) -> StoreResult<usize>;
}

#[async_trait]
impl ReplicaPeer for SqliteStore {
    fn peer_id(&self) -> &str {
        self.replica_id()
    }

    async fn changes_since(&self, since: u64, limit: usize) -> StoreResult<ChangeBatch> {
        SqliteStore::changes_since(self, since, limit).await
    }

    async fn apply_changes(&self, docs: Vec<ReplicatedDoc>) -> StoreResult<usize> {
        SqliteStore::apply_changes(self, docs).await
    }
}

/// Check if a remote URL names a WebSocket server
pub fn is_websocket_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// Open the peer a remote URL points at
///
/// `ws://` and `wss://` URLs connect to a replication server; anything else
/// is taken as the path of another database file.
pub async fn open_remote(url: &str) -> StoreResult<Box<dyn ReplicaPeer>> {
    if is_websocket_url(url) {
        let peer = WebSocketPeer::connect(url).await?;
        return Ok(Box::new(peer));
    }

    let path = url.strip_prefix("file://").unwrap_or(url);
    debug!(path = %path, "Opening file replica");
    Ok(Box::new(SqliteStore::open(Path::new(path))?))
}
