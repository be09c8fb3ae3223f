//! Replication server
//!
//! Accepts WebSocket clients and answers replication requests against a
//! local store. Each connection is served on its own task.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::message::{Operation, Reply, Request, Response, PROTOCOL_VERSION};
use crate::storage::{SqliteStore, StoreError, StoreResult};

/// Largest batch a client may request
const MAX_BATCH: usize = 1000;

/// Serve replication requests until the listener fails
pub async fn serve(store: SqliteStore, listener: TcpListener) -> StoreResult<()> {
    info!(addr = ?listener.local_addr().ok(), "Replication server listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        let store = store.clone();
        tokio::spawn(async move {
            debug!(%addr, "Replication client connected");
            match handle_connection(store, stream).await {
                Ok(()) => debug!(%addr, "Replication client disconnected"),
                Err(e) => warn!(%addr, error = %e, "Replication client failed"),
            }
        });
    }
}

async fn handle_connection(store: SqliteStore, stream: TcpStream) -> StoreResult<()> {
    let mut ws = accept_async(stream)
        .await
        .map_err(|e| StoreError::Remote(format!("WebSocket handshake failed: {}", e)))?;

    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| StoreError::Remote(e.to_string()))?;
        let data = match msg {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };

        let response = match Request::decode(&data) {
            Ok(request) => Response {
                id: request.id,
                result: answer(&store, request.op).await,
            },
            Err(e) => Response::error(0, format!("Malformed request: {}", e)),
        };

        let bytes = response
            .encode()
            .map_err(|e| StoreError::Remote(format!("Failed to encode response: {}", e)))?;
        ws.send(Message::Binary(bytes))
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;
    }

    Ok(())
}

async fn answer(store: &SqliteStore, op: Operation) -> Reply {
    let result = match op {
        Operation::Hello { protocol_version } if protocol_version != PROTOCOL_VERSION => {
            return Reply::Error {
                message: format!(
                    "Unsupported protocol version {} (server speaks {})",
                    protocol_version, PROTOCOL_VERSION
                ),
            };
        }
        Operation::Hello { .. } => Ok(Reply::Peer {
            peer_id: store.replica_id().to_string(),
        }),
        Operation::Changes { since, limit } => store
            .changes_since(since, limit.clamp(1, MAX_BATCH))
            .await
            .map(|batch| Reply::Changes { batch }),
        Operation::Apply { docs } => store
            .apply_changes(docs)
            .await
            .map(|written| Reply::Applied { written }),
    };

    result.unwrap_or_else(|e| Reply::Error {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_answer_hello() {
        let store = SqliteStore::open_in_memory().unwrap();
        let reply = answer(
            &store,
            Operation::Hello {
                protocol_version: PROTOCOL_VERSION,
            },
        )
        .await;
        assert_eq!(
            reply,
            Reply::Peer {
                peer_id: store.replica_id().to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_answer_rejects_other_versions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let reply = answer(&store, Operation::Hello { protocol_version: 99 }).await;
        assert!(matches!(reply, Reply::Error { .. }));
    }

    #[tokio::test]
    async fn test_answer_changes_and_apply() {
        let source = SqliteStore::open_in_memory().unwrap();
        source.put(json!({"_id": "a", "type": "note"})).await.unwrap();

        let Reply::Changes { batch } = answer(&source, Operation::Changes { since: 0, limit: 0 }).await
        else {
            panic!("Expected Changes reply");
        };
        assert_eq!(batch.docs.len(), 1);

        let target = SqliteStore::open_in_memory().unwrap();
        let reply = answer(&target, Operation::Apply { docs: batch.docs }).await;
        assert_eq!(reply, Reply::Applied { written: 1 });
        assert!(target.get("a").await.is_ok());
    }
}
