//! Replication between document stores
//!
//! Stores exchange documents through change feeds. Each side exposes the
//! revisions written after a sequence number and merges revisions it
//! receives, keeping losing revisions as conflicts.
//!
//! ## Peers
//!
//! - Another SQLite database file, opened directly
//! - A replication server reached over WebSocket (`ws://` or `wss://`)
//!
//! ## Protocol
//!
//! CBOR-encoded requests and responses, one per binary WebSocket frame:
//! 1. `Hello` handshake; the server answers with its replica id
//! 2. `Changes` reads the server's change feed
//! 3. `Apply` merges revisions into the server's store
//!
//! ## Usage
//!
//! ```ignore
//! let mut handle = store.begin_replication("ws://localhost:5984", ReplicationOptions::default());
//! while let Some(event) = handle.next_event().await {
//!     println!("{:?}", event);
//! }
//! ```

mod client;
mod controller;
mod message;
mod peer;
mod replicate;
mod server;
mod session;
mod state;

pub use client::WebSocketPeer;
pub use controller::{SyncController, SyncError, REMOTE_URL_KEY};
pub use message::{Operation, Reply, Request, Response, PROTOCOL_VERSION};
pub use peer::{is_websocket_url, open_remote, ReplicaPeer};
pub use replicate::{replicate, sync_once, SyncReport};
pub use server::serve;
pub use session::{
    spawn_replication, ConnectionStatus, Direction, ReplicationHandle, ReplicationOptions,
    SyncCommand, SyncEvent,
};
pub use state::Checkpoint;
