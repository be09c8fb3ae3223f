//! Replication client
//!
//! WebSocket connection to a replication server. Requests are answered in
//! order on a single connection, so one request is in flight at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::message::{Operation, Reply, Request, Response, PROTOCOL_VERSION};
use super::peer::ReplicaPeer;
use crate::storage::{ChangeBatch, ReplicatedDoc, StoreError, StoreResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for any single response
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// A replication server reached over WebSocket
pub struct WebSocketPeer {
    url: String,
    /// Replica id announced by the server
    remote_id: String,
    next_id: AtomicU64,
    stream: Mutex<WsStream>,
}

impl WebSocketPeer {
    /// Connect and perform the handshake
    pub async fn connect(url: &str) -> StoreResult<Self> {
        debug!("Connecting to {}", url);
        let (stream, _response) = tokio::time::timeout(RESPONSE_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| {
                StoreError::Remote(format!(
                    "Timeout connecting to {}. Check that the server is running.",
                    url
                ))
            })?
            .map_err(|e| StoreError::Remote(format!("Failed to connect to {}: {}", url, e)))?;

        let mut peer = Self {
            url: url.to_string(),
            remote_id: String::new(),
            next_id: AtomicU64::new(1),
            stream: Mutex::new(stream),
        };

        match peer
            .call(Operation::Hello {
                protocol_version: PROTOCOL_VERSION,
            })
            .await?
        {
            Reply::Peer { peer_id } => {
                info!(url = %url, remote = %peer_id, "Connected to replication server");
                peer.remote_id = peer_id;
                Ok(peer)
            }
            other => Err(unexpected_reply(url, &other)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close the connection
    pub async fn close(&self) {
        let mut stream = self.stream.lock().await;
        stream.close(None).await.ok();
    }

    /// Send one request and wait for its response
    async fn call(&self, op: Operation) -> StoreResult<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = Request { id, op }
            .encode()
            .map_err(|e| StoreError::Remote(format!("Failed to encode request: {}", e)))?;

        let mut stream = self.stream.lock().await;
        stream
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| StoreError::Remote(format!("Send to {} failed: {}", self.url, e)))?;

        loop {
            let msg = tokio::time::timeout(RESPONSE_TIMEOUT, stream.next())
                .await
                .map_err(|_| {
                    StoreError::Remote(format!("Timeout waiting for response from {}", self.url))
                })?;

            match msg {
                Some(Ok(Message::Binary(data))) => {
                    let response = Response::decode(&data).map_err(|e| {
                        StoreError::Remote(format!("Malformed response from {}: {}", self.url, e))
                    })?;
                    if response.id != id {
                        debug!(expected = id, got = response.id, "Skipping stale response");
                        continue;
                    }
                    return match response.result {
                        Reply::Error { message } => Err(StoreError::Remote(message)),
                        reply => Ok(reply),
                    };
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(StoreError::Remote(format!(
                        "Replication server ({}) closed connection",
                        self.url
                    )));
                }
                Some(Err(e)) => {
                    return Err(StoreError::Remote(format!(
                        "Replication connection error ({}): {}",
                        self.url, e
                    )));
                }
                // Ping/pong and text frames
                Some(Ok(_)) => {}
            }
        }
    }
}

#[async_trait]
impl ReplicaPeer for WebSocketPeer {
    fn peer_id(&self) -> &str {
        &self.remote_id
    }

    async fn changes_since(&self, since: u64, limit: usize) -> StoreResult<ChangeBatch> {
        match self.call(Operation::Changes { since, limit }).await? {
            Reply::Changes { batch } => Ok(batch),
            other => Err(unexpected_reply(&self.url, &other)),
        }
    }

    async fn apply_changes(&self, docs: Vec<ReplicatedDoc>) -> StoreResult<usize> {
        match self.call(Operation::Apply { docs }).await? {
            Reply::Applied { written } => Ok(written),
            other => Err(unexpected_reply(&self.url, &other)),
        }
    }
}

fn unexpected_reply(url: &str, reply: &Reply) -> StoreError {
    StoreError::Remote(format!("Unexpected reply from {}: {:?}", url, reply))
}
