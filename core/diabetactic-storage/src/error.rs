//! Error types for the storage layer.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// The database hit its capacity limit (`SQLITE_FULL`).
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A stored row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Returns true if the write failed because storage is exhausted.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DiskFull) => StorageError::QuotaExceeded(e.to_string()),
            _ => StorageError::Database(e),
        }
    }
}
