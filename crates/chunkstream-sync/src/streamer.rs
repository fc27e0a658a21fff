//! The streamer: one per node, multiplexing subscriptions over a transport.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use chunkstream_core::{ChunkHash, Priority, Range, StreamId};

use crate::error::{Result, SyncError};
use crate::messages::{limits, PeerId, StreamMessage};
use crate::peer::Peer;
use crate::queue::{outbox, spawn_writer};
use crate::registry::Registry;
use crate::transport::Transport;

/// Configuration for a [`Streamer`].
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Offers with more hashes than this are discarded.
    pub max_hashes_per_offer: usize,
    /// Push wanted chunk data with `ChunkDelivery` after each want.
    pub deliver_chunks: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            max_hashes_per_offer: limits::MAX_HASHES_PER_OFFER,
            deliver_chunks: true,
            event_capacity: 256,
        }
    }
}

/// Observable outcomes of subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Every wanted chunk of a batch arrived.
    BatchCompleted {
        peer: PeerId,
        stream: StreamId,
        until: u64,
    },
    /// A historical range was offered in full.
    HistoryServed { peer: PeerId, stream: StreamId },
    /// A subscription was torn down after a batch or fetch failure.
    SubscriptionFailed {
        peer: PeerId,
        stream: StreamId,
        error: String,
    },
    /// The peer refused one of our Subscribe requests.
    SubscribeRefused { peer: PeerId, error: String },
}

/// Receives chunk data pushed by serving peers.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn deliver(&self, peer: &PeerId, hash: ChunkHash, data: Bytes) -> Result<()>;
}

/// Protocol engine for one node.
pub struct Streamer<T: Transport> {
    transport: Arc<T>,
    registry: Arc<Registry>,
    config: StreamerConfig,
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    events: broadcast::Sender<StreamEvent>,
    sink: Option<Arc<dyn ChunkSink>>,
}

impl<T: Transport + 'static> Streamer<T> {
    /// Create a streamer over a frozen registry.
    pub fn new(registry: Arc<Registry>, transport: Arc<T>, config: StreamerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            transport,
            registry,
            config,
            peers: RwLock::new(HashMap::new()),
            events,
            sink: None,
        }
    }

    /// Route inbound `ChunkDelivery` data to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn ChunkSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Subscribe to subscription outcomes.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Session for `peer`, if connected.
    pub fn peer(&self, peer: &PeerId) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
    }

    /// Open a session with `peer`. Idempotent.
    pub fn add_peer(&self, peer: PeerId) -> Arc<Peer> {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = peers.get(&peer) {
            return Arc::clone(existing);
        }

        let (out, queues) = outbox();
        let writer = spawn_writer(peer, queues, Arc::clone(&self.transport));
        let session = Arc::new(Peer::new(
            peer,
            out,
            writer,
            Arc::clone(&self.registry),
            self.config.clone(),
            self.events.clone(),
        ));
        peers.insert(peer, Arc::clone(&session));
        tracing::debug!(peer = %peer, "peer added");
        session
    }

    /// Close the session with `peer`, tearing down all its subscriptions.
    pub fn remove_peer(&self, peer: &PeerId) -> bool {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Request `stream` from `peer`. Returns once Subscribe is queued.
    pub fn subscribe(
        &self,
        peer: &PeerId,
        stream: StreamId,
        history: Option<Range>,
        priority: Priority,
    ) -> Result<()> {
        self.registry.client_factory(stream.name())?;
        let session = self.peer(peer).ok_or(SyncError::PeerNotConnected(*peer))?;
        session.subscribe(stream, history, priority)
    }

    /// Tear down `stream` with `peer` in both directions.
    ///
    /// Returns whether an Unsubscribe was sent; unknown peers and streams
    /// are not an error.
    pub fn unsubscribe(&self, peer: &PeerId, stream: &StreamId) -> Result<bool> {
        Ok(self
            .peer(peer)
            .map(|session| session.unsubscribe(stream))
            .unwrap_or(false))
    }

    /// Dispatch one inbound message without waiting on client, server or
    /// sink callbacks.
    ///
    /// Messages from peers without a session are discarded.
    pub fn handle_message(&self, from: PeerId, message: StreamMessage) {
        if let Err(reason) = message.validate_limits() {
            tracing::warn!(peer = %from, code = message.code(), reason, "message over limits");
            return;
        }

        let Some(session) = self.peer(&from) else {
            tracing::debug!(peer = %from, code = message.code(), "message from unknown peer discarded");
            return;
        };

        match message {
            StreamMessage::Subscribe(m) => session.handle_subscribe(m),
            StreamMessage::Unsubscribe(m) => session.handle_unsubscribe(m),
            StreamMessage::OfferedHashes(m) => session.handle_offered(m),
            StreamMessage::WantedHashes(m) => session.handle_wanted(m),
            StreamMessage::TakeoverProof(m) => session.handle_takeover(m),
            StreamMessage::SubscribeError(m) => session.handle_refusal(m),
            StreamMessage::ChunkDelivery(m) => match &self.sink {
                Some(sink) => {
                    let sink = Arc::clone(sink);
                    tokio::spawn(async move {
                        if let Err(e) = sink.deliver(&from, m.hash, m.data).await {
                            tracing::warn!(peer = %from, hash = %m.hash, error = %e, "chunk rejected");
                        }
                    });
                }
                None => tracing::debug!(peer = %from, hash = %m.hash, "no sink, chunk dropped"),
            },
        }
    }

    /// Receive and dispatch until the transport fails.
    ///
    /// Undecodable frames are logged and skipped.
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.transport.recv().await {
                Ok((from, message)) => self.handle_message(from, message),
                Err(SyncError::Codec(e)) => {
                    tracing::warn!(error = %e, "dropping undecodable frame");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "streamer stopped");
                    return Err(e);
                }
            }
        }
    }

    /// Close every peer session.
    pub fn close(&self) {
        let sessions: Vec<Arc<Peer>> = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            session.close();
        }
    }
}
