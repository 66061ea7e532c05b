//! Storage error types.

use riskguard_core::CacheError;
use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from rusqlite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (e.g., creating directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection lock was poisoned by a panicking holder.
    #[error("Connection pool poisoned")]
    Poisoned,
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Poisoned => CacheError::Unavailable(err.to_string()),
            other => CacheError::Backend(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
