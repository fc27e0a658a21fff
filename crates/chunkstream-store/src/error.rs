//! Error types for the store module.

use thiserror::Error;

use chunkstream_core::ChunkHash;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Delivered data does not hash to the address it was delivered under.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ChunkHash,
        actual: ChunkHash,
    },

    /// The store stopped accepting writes while a caller was waiting.
    #[error("store closed")]
    Closed,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
