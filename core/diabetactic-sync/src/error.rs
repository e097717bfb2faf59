//! Error types for the sync layer.

use diabetactic_gateway::GatewayError;
use diabetactic_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote call failed and the mutation was not queued.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Local store error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No queue item with this sequence id.
    #[error("queue item not found: {0}")]
    ItemNotFound(i64),

    /// The item is not waiting for conflict resolution.
    #[error("queue item {0} is not in conflict")]
    NotInConflict(i64),
}
