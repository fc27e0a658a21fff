//! The Node: a chunk store wired to the stream protocol.
//!
//! A node owns a store and a [`Streamer`]. Its registry carries the
//! store-backed stream kind, so subscribing to a peer pulls that peer's
//! chunks into the local store.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use chunkstream_core::{ChunkHash, Priority, Range, StreamId};
use chunkstream_store::ChunkStore;
use chunkstream_sync::{PeerId, Registry, StreamEvent, Streamer, StreamerConfig, Transport};

use crate::error::Result;
use crate::syncer::{register_store_stream, StoreSink};

/// Configuration for a [`Node`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Protocol engine configuration.
    pub streamer: StreamerConfig,
    /// Max hashes offered per batch.
    pub batch_size: usize,
    /// Name the store-backed stream kind is registered under.
    pub stream_name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            streamer: StreamerConfig::default(),
            batch_size: 128,
            stream_name: "SYNC".to_string(),
        }
    }
}

/// The main Node struct.
///
/// Provides a unified API for:
/// - Storing chunks locally
/// - Subscribing to peers' streams
/// - Observing subscription outcomes
pub struct Node<S: ChunkStore + 'static, T: Transport + 'static> {
    store: Arc<S>,
    streamer: Arc<Streamer<T>>,
    config: NodeConfig,
    run: Mutex<Option<JoinHandle<()>>>,
}

impl<S: ChunkStore + 'static, T: Transport + 'static> Node<S, T> {
    /// Create a node serving and fetching `store` under `config.stream_name`.
    pub fn new(store: S, transport: T, config: NodeConfig) -> Self {
        Self::with_registry(Arc::new(store), transport, Registry::new(), config)
    }

    /// Create a node with additional stream kinds in `registry`.
    ///
    /// The store-backed kind is registered on top, replacing any factory
    /// under the same name.
    pub fn with_registry(store: Arc<S>, transport: T, mut registry: Registry, config: NodeConfig) -> Self {
        register_store_stream(
            &mut registry,
            &config.stream_name,
            Arc::clone(&store),
            config.batch_size,
        );

        let streamer = Streamer::new(
            Arc::new(registry),
            Arc::new(transport),
            config.streamer.clone(),
        )
        .with_sink(Arc::new(StoreSink::new(Arc::clone(&store))));

        Self {
            store,
            streamer: Arc::new(streamer),
            config,
            run: Mutex::new(None),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.streamer.local_peer_id()
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn streamer(&self) -> &Streamer<T> {
        &self.streamer
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Start receiving from the transport. Idempotent.
    pub fn spawn(&self) {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if run.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let streamer = Arc::clone(&self.streamer);
        let local = self.local_peer_id();
        *run = Some(tokio::spawn(async move {
            if let Err(e) = streamer.run().await {
                tracing::warn!(peer = %local, error = %e, "node stopped receiving");
            }
        }));
    }

    /// Stop receiving and tear down every peer session.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.streamer.close();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chunk Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a chunk locally; subscribed peers see it in their next live batch.
    pub async fn put(&self, data: impl Into<Bytes>) -> Result<ChunkHash> {
        let (hash, inserted) = self.store.put(data.into()).await?;
        tracing::debug!(hash = %hash, seq = inserted.seq(), "chunk stored");
        Ok(hash)
    }

    pub async fn get(&self, hash: &ChunkHash) -> Result<Option<Bytes>> {
        Ok(self.store.get(hash).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Peer Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a session with `peer`. Messages from peers that were never
    /// connected are ignored.
    pub fn connect(&self, peer: PeerId) {
        self.streamer.add_peer(peer);
    }

    pub fn disconnect(&self, peer: &PeerId) -> bool {
        self.streamer.remove_peer(peer)
    }

    /// The store-backed stream this node syncs.
    pub fn stream(&self, live: bool) -> StreamId {
        StreamId::new(self.config.stream_name.clone(), live)
    }

    /// Pull `peer`'s chunks: the live tail, a historical range, or both.
    pub fn sync_from(&self, peer: &PeerId, live: bool, history: Option<Range>, priority: Priority) -> Result<()> {
        self.subscribe(peer, self.stream(live), history, priority)
    }

    pub fn subscribe(
        &self,
        peer: &PeerId,
        stream: StreamId,
        history: Option<Range>,
        priority: Priority,
    ) -> Result<()> {
        Ok(self.streamer.subscribe(peer, stream, history, priority)?)
    }

    pub fn unsubscribe(&self, peer: &PeerId, stream: &StreamId) -> Result<bool> {
        Ok(self.streamer.unsubscribe(peer, stream)?)
    }

    /// Subscribe to subscription outcomes.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.streamer.events()
    }
}

impl<S: ChunkStore + 'static, T: Transport + 'static> Drop for Node<S, T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
