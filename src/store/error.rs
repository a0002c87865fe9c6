//! Metadata store error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from metadata store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error while reading or rewriting the metadata file.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metadata file is not valid JSON, or a record failed to serialize.
    #[error("Metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The store lock was poisoned.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
