//! Replication checkpoints
//!
//! Stores how far each direction of replication with a peer has progressed,
//! so the next session only exchanges newer changes.

use serde::{Deserialize, Serialize};

/// Last replicated update sequence per direction for one peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Remote sequence already pulled into the local store
    pub pulled_seq: u64,
    /// Local sequence already pushed to the remote
    pub pushed_seq: u64,
}

impl Checkpoint {
    /// Check if nothing has been replicated yet
    pub fn is_fresh(&self) -> bool {
        self.pulled_seq == 0 && self.pushed_seq == 0
    }
}
