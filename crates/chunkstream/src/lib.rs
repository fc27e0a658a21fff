//! # Chunkstream
//!
//! Peer-to-peer synchronisation of content-addressed chunks.
//!
//! ## Overview
//!
//! A [`Node`] couples a chunk store with the stream protocol:
//!
//! - **Chunks**: immutable blobs addressed by their BLAKE3 hash
//! - **Store**: an append-ordered index over the chunks a node holds
//! - **Streams**: named slices of that index, offered batch by batch
//! - **Sync**: subscribing to a peer's stream fetches whatever the local
//!   store is missing, live as the peer's index grows or over a fixed range
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chunkstream::{Node, NodeConfig};
//! use chunkstream::core::Priority;
//! use chunkstream::store::MemoryStore;
//! use chunkstream::sync::{MemoryNetwork, PeerId};
//!
//! async fn example() -> chunkstream::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let (a, b) = (PeerId::random(), PeerId::random());
//!
//!     let alice = Node::new(MemoryStore::new(), network.create_transport(a).await, NodeConfig::default());
//!     let bob = Node::new(MemoryStore::new(), network.create_transport(b).await, NodeConfig::default());
//!     alice.spawn();
//!     bob.spawn();
//!
//!     alice.put(&b"hello"[..]).await?;
//!
//!     alice.connect(b);
//!     bob.connect(a);
//!     bob.sync_from(&a, true, None, Priority::Mid)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `chunkstream::core` - Core primitives (ChunkHash, StreamId, WantMask, etc.)
//! - `chunkstream::store` - Storage abstraction and the in-memory store
//! - `chunkstream::sync` - Stream protocol

pub mod error;
pub mod node;
pub mod syncer;

// Re-export component crates
pub use chunkstream_core as core;
pub use chunkstream_store as store;
pub use chunkstream_sync as sync;

// Re-export main types for convenience
pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig};
pub use syncer::{register_store_stream, StoreClient, StoreServer, StoreSink};

// Re-export commonly used core types
pub use chunkstream_core::{ChunkHash, HandoverProof, Priority, Range, StreamId, TakeoverProof};
