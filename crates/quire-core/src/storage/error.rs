//! Storage error handling
//!
//! Every store primitive fails with a [`StoreError`]. Callers that need to
//! branch on the failure (missing tag map, orphan checks, conflict retries)
//! match on [`StoreError::kind`] rather than on individual variants.

use std::io;
use thiserror::Error;

/// Coarse classification of store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The referenced document is absent (or deleted)
    NotFound,
    /// Revision mismatch on write
    Conflict,
    /// Anything else; not recoverable locally
    Unexpected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Document does not exist (or is a tombstone)
    #[error("Document not found: '{id}'")]
    NotFound { id: String },

    /// Revision supplied does not match the current revision
    #[error("Document update conflict: '{id}'")]
    Conflict { id: String },

    /// Queried a view that was never registered
    #[error("Unknown view: '{0}'")]
    UnknownView(String),

    /// Document body is not a JSON object or lacks required fields
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote replica failed or answered with an error
    #[error("Remote error: {0}")]
    Remote(String),

    /// Blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound { id: id.into() }
    }

    pub fn conflict(id: impl Into<String>) -> Self {
        StoreError::Conflict { id: id.into() }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Unexpected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Check if re-reading and reapplying the write can succeed
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::Conflict { .. } => {
                Some("The document changed since it was read. Re-read it and apply the change again.")
            }
            StoreError::Remote(_) => {
                Some("Check that the remote replica is reachable and the URL is correct.")
            }
            StoreError::Database(_) => {
                Some("Check that the data directory is writable and the database file is not corrupted.")
            }
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
