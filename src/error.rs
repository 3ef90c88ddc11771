//! Error taxonomy shared by every layer of the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Typed failure of a table operation.
///
/// Structured responses turn every variant into `success: false` with the
/// rendered message; nothing here is swallowed by the engine itself.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A table, row or field id could not be resolved.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed parameter or a value rejected by the field schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Delete blocked by dependent state and `force` was not given.
    #[error("row {0} is in use")]
    InUse(String),

    /// No built-in or custom handler resolves the action name.
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// Invariant violation while computing a delta.
    #[error("internal error: {0}")]
    Internal(String),

    /// Backing data file for a derived view is absent.
    #[error("data file missing: {}", .0.display())]
    DataFileMissing(PathBuf),

    #[error("storage error: {0}")]
    Storage(#[from] lmdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn not_found(what: impl Into<String>) -> Self {
        SyncError::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        SyncError::InvalidInput(what.into())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
