//! # Chunkstream Sync
//!
//! Subscription protocol for moving content-addressed chunks between peers.
//!
//! ## Overview
//!
//! A peer subscribes to a named stream on another peer. The serving side
//! cuts the stream into batches of hashes and offers them one at a time;
//! the requesting side answers with a want-mask of the hashes its store is
//! missing, fetches them, and reports the batch done only once every fetch
//! resolved. Live streams follow the head of the stream; historical streams
//! serve a bounded range and stop.
//!
//! What a stream contains is not known here. Stream kinds are plugged in by
//! registering [`Client`] and [`Server`] factories under a name in a
//! [`Registry`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chunkstream_core::{Priority, StreamId};
//! use chunkstream_sync::{MemoryNetwork, PeerId, Registry, Streamer, StreamerConfig};
//!
//! async fn example() -> chunkstream_sync::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(PeerId::random()).await;
//!
//!     let registry = Registry::new();
//!     // registry.register_client("SYNC", ...);
//!     // registry.register_server("SYNC", ...);
//!
//!     let streamer = Streamer::new(Arc::new(registry), Arc::new(transport), StreamerConfig::default());
//!     let peer = PeerId::random();
//!     streamer.add_peer(peer);
//!     streamer.subscribe(&peer, StreamId::new("SYNC", true), None, Priority::Mid)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client                              Server
//!   |-------- Subscribe -------------->|
//!   |<------- OfferedHashes -----------|
//!   |-------- WantedHashes ----------->|
//!   |<------- ChunkDelivery -----------|
//!   |-------- TakeoverProof ---------->|
//!   |<------- OfferedHashes -----------|
//!   |              ...                 |
//!   |-------- Unsubscribe ------------>|
//! ```

pub mod client;
pub mod error;
pub mod messages;
pub mod peer;
mod queue;
pub mod registry;
pub mod server;
pub mod streamer;
pub mod transport;

pub use client::{BatchCompletion, Client, Fetch};
pub use error::{Result, SyncError};
pub use messages::{
    codes, limits, ChunkDeliveryMsg, OfferedHashesMsg, PeerId, StreamMessage, SubscribeErrorMsg,
    SubscribeMsg, TakeoverProofMsg, UnsubscribeMsg, WantedHashesMsg,
};
pub use peer::Peer;
pub use registry::{ClientFactory, Registry, ServerFactory};
pub use server::{Batch, Server};
pub use streamer::{ChunkSink, StreamEvent, Streamer, StreamerConfig};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
