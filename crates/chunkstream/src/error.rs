//! Error types for a chunkstream node.

use chunkstream_store::StoreError;
use chunkstream_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Protocol error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
