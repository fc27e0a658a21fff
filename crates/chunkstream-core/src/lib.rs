//! # Chunkstream Core
//!
//! Pure primitives shared by every chunkstream crate: chunk addressing,
//! stream identity, cursor ranges, delivery priorities, want-masks and the
//! opaque handover/takeover proofs.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`ChunkHash`] - Content address of a chunk ([`HASH_SIZE`] bytes)
//! - [`StreamId`] - Name, optional key and live flag of a stream
//! - [`Range`] - Cursor over a stream's sequence space (`to == 0` is open)
//! - [`Priority`] - Outgoing queue level
//! - [`WantMask`] - Bit-per-hash selection within an offered batch

pub mod error;
pub mod mask;
pub mod proof;
pub mod stream;
pub mod types;

pub use error::CoreError;
pub use mask::{mask_len, WantMask};
pub use proof::{HandoverProof, TakeoverProof};
pub use stream::{Priority, Range, StreamId, PRIORITY_LEVELS};
pub use types::{hash_count, join_hashes, split_hashes, ChunkHash, HASH_SIZE};
