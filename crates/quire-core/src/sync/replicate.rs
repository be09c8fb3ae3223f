//! One-shot replication
//!
//! Copies change batches from a source peer to a target peer until the
//! source reports nothing pending. A full sync pulls first, then pushes,
//! and records both positions in a checkpoint keyed by the remote's id.

use serde::Serialize;
use tracing::{debug, info};

use super::peer::ReplicaPeer;
use crate::storage::{SqliteStore, StoreResult};

/// Documents written in each direction by one sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pulled: usize,
    pub pushed: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.pulled == 0 && self.pushed == 0
    }
}

/// Replicate everything after `since` from `source` into `target`
///
/// Advances `since` past every batch that was applied, so a failure part
/// way through keeps the progress already made.
pub async fn replicate(
    source: &dyn ReplicaPeer,
    target: &dyn ReplicaPeer,
    since: &mut u64,
    batch_size: usize,
) -> StoreResult<usize> {
    let mut written = 0;
    loop {
        let batch = source.changes_since(*since, batch_size.max(1)).await?;
        if !batch.docs.is_empty() {
            debug!(
                from = %source.peer_id(),
                to = %target.peer_id(),
                docs = batch.docs.len(),
                "Applying change batch"
            );
            written += target.apply_changes(batch.docs).await?;
        }
        *since = batch.last_seq;
        if !batch.pending {
            return Ok(written);
        }
    }
}

/// Pull then push once between the local store and a remote peer
pub async fn sync_once(
    local: &SqliteStore,
    remote: &dyn ReplicaPeer,
    batch_size: usize,
) -> StoreResult<SyncReport> {
    let peer_id = remote.peer_id().to_string();
    let mut checkpoint = local.load_checkpoint(&peer_id).await?;

    let pulled = replicate(remote, local, &mut checkpoint.pulled_seq, batch_size).await;
    // Keep pull progress even if the push fails
    local.save_checkpoint(&peer_id, checkpoint).await?;
    let pulled = pulled?;

    let pushed = replicate(local, remote, &mut checkpoint.pushed_seq, batch_size).await;
    local.save_checkpoint(&peer_id, checkpoint).await?;
    let pushed = pushed?;

    let report = SyncReport { pulled, pushed };
    if !report.is_empty() {
        info!(remote = %peer_id, pulled, pushed, "Sync complete");
    }
    Ok(report)
}
