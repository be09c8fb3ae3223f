//! Continuous replication
//!
//! Runs sync passes against a remote in a background task. In live mode the
//! task keeps the session open, syncing again whenever the local store
//! changes, the poll interval elapses, or a push is requested. Failed
//! sessions are retried with exponential backoff.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::peer::open_remote;
use super::replicate::{sync_once, SyncReport};
use crate::storage::{SqliteStore, StoreResult};

/// Floor for the reconnect backoff
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(50);

/// Commands sent to the replication task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Run a sync pass now
    PushNow,
    /// Stop the replication task
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Pull,
    Push,
}

/// Events emitted by the replication task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A sync pass started
    Active,
    /// Documents were written in one direction
    Change {
        direction: Direction,
        docs_written: usize,
    },
    /// Caught up; waiting for more changes
    Paused,
    /// A session failed
    Error(String),
    /// One-shot replication finished
    Complete(SyncReport),
}

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected, not trying
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and idle
    Connected,
    /// Actively syncing
    Syncing,
}

/// Options for a replication session
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// Keep syncing after the first pass
    pub live: bool,
    /// Reconnect after a failed session
    pub retry: bool,
    /// Longest wait between passes in live mode
    pub poll_interval: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Documents per change batch
    pub batch_size: usize,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            live: true,
            retry: true,
            poll_interval: Duration::from_secs(5),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

/// Handle to control and monitor a replication task
pub struct ReplicationHandle {
    /// Send commands to the task
    pub command_tx: mpsc::Sender<SyncCommand>,
    /// Receive events from the task
    pub event_rx: mpsc::Receiver<SyncEvent>,
    /// Watch connection status
    pub status_rx: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl ReplicationHandle {
    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Wait for the next event; `None` once the task has ended
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.event_rx.recv().await
    }

    /// Request a sync pass without waiting for the poll interval
    pub async fn push_now(&self) {
        self.command_tx.send(SyncCommand::PushNow).await.ok();
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        self.command_tx.send(SyncCommand::Shutdown).await.ok();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Replication task ended abnormally");
        }
    }
}

/// Spawn a replication task between `local` and the store at `url`
pub fn spawn_replication(
    local: SqliteStore,
    url: String,
    options: ReplicationOptions,
) -> ReplicationHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

    let task = tokio::spawn(replication_loop(
        local, url, options, command_rx, event_tx, status_tx,
    ));

    ReplicationHandle {
        command_tx,
        event_rx,
        status_rx,
        task,
    }
}

/// How a session ended without error
enum SessionEnd {
    Shutdown,
    Complete,
}

/// Main loop with reconnection
async fn replication_loop(
    local: SqliteStore,
    url: String,
    options: ReplicationOptions,
    mut command_rx: mpsc::Receiver<SyncCommand>,
    event_tx: mpsc::Sender<SyncEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let mut reconnect_delay = options.initial_reconnect_delay;

    loop {
        status_tx.send_replace(ConnectionStatus::Connecting);

        match run_session(
            &local,
            &url,
            &options,
            &mut reconnect_delay,
            &mut command_rx,
            &event_tx,
            &status_tx,
        )
        .await
        {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Complete) => {
                info!(url = %url, "Replication complete");
                break;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Replication failed");
                emit(&event_tx, SyncEvent::Error(e.to_string()));
                if !options.retry {
                    break;
                }
            }
        }

        status_tx.send_replace(ConnectionStatus::Disconnected);

        // Wait before reconnecting, but check for shutdown
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = (reconnect_delay * 2)
                    .min(options.max_reconnect_delay)
                    .max(MIN_RECONNECT_DELAY);
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SyncCommand::Shutdown) | None => break,
                    // Runs as soon as we reconnect
                    Some(SyncCommand::PushNow) => {}
                }
            }
        }
    }

    status_tx.send_replace(ConnectionStatus::Disconnected);
    debug!(url = %url, "Replication task stopped");
}

/// Connect and run sync passes until shutdown, completion, or error
async fn run_session(
    local: &SqliteStore,
    url: &str,
    options: &ReplicationOptions,
    reconnect_delay: &mut Duration,
    command_rx: &mut mpsc::Receiver<SyncCommand>,
    event_tx: &mpsc::Sender<SyncEvent>,
    status_tx: &watch::Sender<ConnectionStatus>,
) -> StoreResult<SessionEnd> {
    let remote = open_remote(url).await?;
    *reconnect_delay = options.initial_reconnect_delay;
    status_tx.send_replace(ConnectionStatus::Connected);
    info!(url = %url, remote = %remote.peer_id(), live = options.live, "Replication started");

    let mut updates = local.subscribe_updates();

    loop {
        // Writes made during the pass trigger another one
        updates.borrow_and_update();

        status_tx.send_replace(ConnectionStatus::Syncing);
        emit(event_tx, SyncEvent::Active);

        let report = sync_once(local, remote.as_ref(), options.batch_size).await?;
        if report.pulled > 0 {
            emit(
                event_tx,
                SyncEvent::Change {
                    direction: Direction::Pull,
                    docs_written: report.pulled,
                },
            );
        }
        if report.pushed > 0 {
            emit(
                event_tx,
                SyncEvent::Change {
                    direction: Direction::Push,
                    docs_written: report.pushed,
                },
            );
        }
        status_tx.send_replace(ConnectionStatus::Connected);

        if !options.live {
            emit(event_tx, SyncEvent::Complete(report));
            return Ok(SessionEnd::Complete);
        }
        emit(event_tx, SyncEvent::Paused);

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(SessionEnd::Shutdown);
                }
            }
            _ = tokio::time::sleep(options.poll_interval) => {}
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SyncCommand::PushNow) => {}
                    Some(SyncCommand::Shutdown) | None => return Ok(SessionEnd::Shutdown),
                }
            }
        }
    }
}

/// Send an event without blocking replication on a slow listener
fn emit(event_tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    if let Err(e) = event_tx.try_send(event) {
        debug!(error = %e, "Dropped replication event");
    }
}
