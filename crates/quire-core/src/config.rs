//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/quire/config.toml)
//! 3. Environment variables (QUIRE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::ReplicationOptions;

/// Environment variable prefix
const ENV_PREFIX: &str = "QUIRE";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (database, settings)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name, without extension
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Attempts per tag map update before a conflict is reported
    #[serde(default = "default_tag_conflict_retries")]
    pub tag_conflict_retries: u32,

    /// Log file path (optional, logs to stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Replication session settings
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Replication session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Keep replicating after the first pass
    pub live: bool,
    /// Reconnect after failures instead of giving up
    pub retry: bool,
    /// Seconds between polls of the remote in live mode
    pub poll_interval_secs: u64,
    pub initial_reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
    /// Documents per replication batch
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            live: true,
            retry: true,
            poll_interval_secs: 5,
            initial_reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
            batch_size: 100,
        }
    }
}

impl SyncConfig {
    /// Options for a replication session
    pub fn replication_options(&self) -> ReplicationOptions {
        ReplicationOptions {
            live: self.live,
            retry: self.retry,
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            initial_reconnect_delay: Duration::from_secs(self.initial_reconnect_delay_secs),
            max_reconnect_delay: Duration::from_secs(self.max_reconnect_delay_secs),
            batch_size: self.batch_size.max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_name: default_database_name(),
            tag_conflict_retries: default_tag_conflict_retries(),
            log_file: None,
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (QUIRE_DATA_DIR, QUIRE_DATABASE, QUIRE_TAG_RETRIES)
    /// 2. Config file (~/.config/quire/config.toml or QUIRE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path from the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // QUIRE_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // QUIRE_DATABASE
        if let Ok(val) = std::env::var(format!("{}_DATABASE", ENV_PREFIX)) {
            if !val.is_empty() {
                self.database_name = val;
            }
        }

        // QUIRE_TAG_RETRIES
        if let Ok(val) = std::env::var(format!("{}_TAG_RETRIES", ENV_PREFIX)) {
            if let Ok(retries) = val.parse() {
                self.tag_conflict_retries = retries;
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with QUIRE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quire")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.database_name))
    }

    /// Get the path to the settings file (remote URL and friends)
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.toml")
    }

    /// Get the log file path, defaulting into the data directory
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("quire.log"))
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quire")
}

fn default_database_name() -> String {
    "notes".to_string()
}

fn default_tag_conflict_retries() -> u32 {
    16
}
