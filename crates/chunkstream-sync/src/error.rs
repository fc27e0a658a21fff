//! Error types for the sync module.

use thiserror::Error;

use chunkstream_core::{CoreError, StreamId};

use crate::messages::PeerId;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No factory registered for a stream kind.
    #[error("stream {0} not registered")]
    NotRegistered(String),

    /// An active client already exists for this stream.
    #[error("already subscribed to {0}")]
    AlreadySubscribed(StreamId),

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(PeerId),

    /// The server capability failed to produce a batch or serve data.
    #[error("server error: {0}")]
    Server(String),

    /// The client capability failed to fetch a wanted chunk.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Malformed core value (hash buffer, want-mask, priority).
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
