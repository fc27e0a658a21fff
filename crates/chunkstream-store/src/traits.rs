//! ChunkStore trait: the abstract interface for chunk persistence.

use async_trait::async_trait;
use bytes::Bytes;

use chunkstream_core::ChunkHash;

use crate::error::Result;

/// Result of inserting a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Chunk was new and got this sequence number.
    Inserted(u64),
    /// Chunk already exists at this sequence number (idempotent - not an error).
    AlreadyExists(u64),
}

impl InsertResult {
    /// Sequence number of the chunk, new or existing.
    pub fn seq(&self) -> u64 {
        match self {
            InsertResult::Inserted(seq) | InsertResult::AlreadyExists(seq) => *seq,
        }
    }
}

/// Async interface for chunk persistence.
///
/// # Design Notes
///
/// - Chunks are addressed by [`ChunkHash::of`] their content.
/// - The store keeps an insertion-ordered index; sequence numbers start at 1
///   and are never reused, so `head()` only grows.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Chunk Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a chunk under its content address.
    async fn put(&self, data: Bytes) -> Result<(ChunkHash, InsertResult)>;

    /// Store a chunk delivered under `hash`, rejecting it if the content
    /// does not match.
    async fn put_verified(&self, hash: &ChunkHash, data: Bytes) -> Result<InsertResult>;

    /// Get a chunk by its address.
    async fn get(&self, hash: &ChunkHash) -> Result<Option<Bytes>>;

    /// Check if a chunk exists.
    async fn has(&self, hash: &ChunkHash) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Index Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Highest sequence number assigned so far (0 when empty).
    async fn head(&self) -> Result<u64>;

    /// Hashes with `after < seq <= until`, ordered by seq, at most `limit`.
    ///
    /// `until == 0` means no upper bound.
    async fn hashes_in(&self, after: u64, until: u64, limit: usize) -> Result<Vec<(u64, ChunkHash)>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Waiting
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve once `hash` is stored.
    async fn wait_for_chunk(&self, hash: &ChunkHash) -> Result<()>;

    /// Resolve with the new head once it exceeds `after`.
    async fn wait_for_head(&self, after: u64) -> Result<u64>;
}
