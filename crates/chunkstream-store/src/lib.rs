//! # Chunkstream Store
//!
//! Storage abstraction for chunk data. Provides a trait-based interface over
//! a content-addressed, append-ordered chunk log, with an in-memory
//! implementation.
//!
//! ## Key Types
//!
//! - [`ChunkStore`] - The async trait for all storage operations
//! - [`MemoryStore`] - In-memory storage
//! - [`InsertResult`] - Result of inserting a chunk
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Inserting the same chunk twice returns `AlreadyExists`
//! - **Sequence index**: every new chunk gets the next sequence number,
//!   starting at 1; batches of a stream are cut from this index
//! - **Waitable arrivals**: callers can wait for a specific chunk or for the
//!   index to grow, which backs both fetch handles and live batches

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use traits::{ChunkStore, InsertResult};
