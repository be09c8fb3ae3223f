//! Persistent key-value settings
//!
//! A small string store that survives restarts, independent of the
//! document database. The replication controller keeps the remote URL here.
//!
//! `FileSettings` writes a TOML table to the data directory using atomic
//! writes (write to temp file, then rename) so a crash never leaves a
//! half-written file behind.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Errors from the settings store
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to access settings file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// String key-value store
pub trait SettingsStore: Send + Sync {
    fn get_string(&self, key: &str) -> SettingsResult<Option<String>>;

    fn set_string(&self, key: &str, value: &str) -> SettingsResult<()>;

    /// Remove a key; removing an absent key is not an error
    fn remove_key(&self, key: &str) -> SettingsResult<()>;
}

/// Settings stored as a TOML file
pub struct FileSettings {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> SettingsResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, values: &BTreeMap<String, String>) -> SettingsResult<()> {
        let content = toml::to_string_pretty(values)?;
        atomic_write(&self.path, content.as_bytes()).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl SettingsStore for FileSettings {
    fn get_string(&self, key: &str) -> SettingsResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }

    fn set_string(&self, key: &str, value: &str) -> SettingsResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.store(&values)
    }

    fn remove_key(&self, key: &str) -> SettingsResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.store(&values)?;
        }
        Ok(())
    }
}

/// Settings kept in memory (for testing)
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get_string(&self, key: &str) -> SettingsResult<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> SettingsResult<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_key(&self, key: &str) -> SettingsResult<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Write data to a file atomically
///
/// Writes to a temporary file first, then renames it over the target.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Temp file in the same directory so the rename stays atomic
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}
