//! Replication controller
//!
//! Keeps the remote URL in the settings store and starts replication
//! sessions for it. The session handle goes back to the caller, which owns
//! event subscription.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::peer::open_remote;
use super::replicate::{sync_once, SyncReport};
use super::session::{ReplicationHandle, ReplicationOptions};
use crate::settings::{SettingsError, SettingsStore};
use crate::storage::{SqliteStore, StoreError};

/// Settings key holding the remote URL
pub const REMOTE_URL_KEY: &str = "remoteURL";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No remote configured. Set one with 'quire remote set <url>'")]
    NoRemote,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Manages the remote endpoint and replication sessions
#[derive(Clone)]
pub struct SyncController {
    local: SqliteStore,
    settings: Arc<dyn SettingsStore>,
    options: ReplicationOptions,
}

impl SyncController {
    pub fn new(
        local: SqliteStore,
        settings: Arc<dyn SettingsStore>,
        options: ReplicationOptions,
    ) -> Self {
        Self {
            local,
            settings,
            options,
        }
    }

    pub fn options(&self) -> &ReplicationOptions {
        &self.options
    }

    /// Stored remote URL, if any
    pub fn remote_url(&self) -> Result<Option<String>, SyncError> {
        Ok(self
            .settings
            .get_string(REMOTE_URL_KEY)?
            .filter(|url| !url.trim().is_empty()))
    }

    pub fn set_remote_url(&self, url: &str) -> Result<(), SyncError> {
        let url = url.trim();
        if url.is_empty() {
            return self.clear_remote_url();
        }
        self.settings.set_string(REMOTE_URL_KEY, url)?;
        info!(url = %url, "Remote URL set");
        Ok(())
    }

    pub fn clear_remote_url(&self) -> Result<(), SyncError> {
        self.settings.remove_key(REMOTE_URL_KEY)?;
        info!("Remote URL cleared");
        Ok(())
    }

    /// Start a session if a remote URL is stored
    pub fn init(&self) -> Result<Option<ReplicationHandle>, SyncError> {
        match self.remote_url()? {
            Some(url) => Ok(Some(self.start(&url))),
            None => {
                debug!("No remote URL stored; replication not started");
                Ok(None)
            }
        }
    }

    /// Start a session for the stored remote URL
    pub fn setup_sync(&self) -> Result<ReplicationHandle, SyncError> {
        let url = self.remote_url()?.ok_or(SyncError::NoRemote)?;
        Ok(self.start(&url))
    }

    /// Pull then push once against the stored remote
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let url = self.remote_url()?.ok_or(SyncError::NoRemote)?;
        let remote = open_remote(&url).await?;
        Ok(sync_once(&self.local, remote.as_ref(), self.options.batch_size).await?)
    }

    fn start(&self, url: &str) -> ReplicationHandle {
        info!(url = %url, "Starting replication");
        self.local.begin_replication(url, self.options.clone())
    }
}
