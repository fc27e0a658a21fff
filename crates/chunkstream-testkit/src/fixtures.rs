//! Test fixtures and helpers.
//!
//! Scripted [`Client`]/[`Server`] implementations and a harness that puts a
//! running [`Streamer`] opposite a transport the test drives by hand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use chunkstream_core::{
    ChunkHash, HandoverProof, Priority, Range, StreamId, TakeoverProof, HASH_SIZE,
};
use chunkstream_store::{ChunkStore, MemoryStore};
use chunkstream_sync::{
    Batch, BatchCompletion, Client, Fetch, MemoryNetwork, MemoryTransport, PeerId, Registry,
    Result, Server, StreamMessage, Streamer, StreamerConfig, SyncError, Transport,
};

/// How long `expect` waits for a message.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The `i`-th fixture hash.
pub fn hash(i: u8) -> ChunkHash {
    ChunkHash::of(&[i])
}

/// Deterministic chunk payload.
pub fn chunk_data(i: usize) -> Bytes {
    Bytes::from(format!("chunk-{:06}", i))
}

/// Fill `store` with `count` chunks, returning their hashes in seq order.
pub async fn fill_store(store: &MemoryStore, count: usize) -> Vec<ChunkHash> {
    let mut hashes = Vec::with_capacity(count);
    for i in 0..count {
        let (hash, _) = store
            .put(chunk_data(i))
            .await
            .unwrap_or_else(|e| panic!("fill_store: {}", e));
        hashes.push(hash);
    }
    hashes
}

/// Random chunk payload of `len` bytes.
pub fn random_chunk(len: usize) -> Bytes {
    use rand::RngCore;
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    Bytes::from(data)
}

/// Install a test-writer tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Test client
// ─────────────────────────────────────────────────────────────────────────────

/// Client whose fetches block until the test opens their gate.
///
/// Hashes without a gate count as already held.
pub struct TestClient {
    gates: HashMap<ChunkHash, watch::Sender<bool>>,
    requested: Mutex<Vec<ChunkHash>>,
    batches: watch::Sender<usize>,
    closed: watch::Sender<bool>,
}

impl TestClient {
    /// Client that wants exactly `wanted`.
    pub fn wanting(wanted: impl IntoIterator<Item = ChunkHash>) -> Arc<Self> {
        let gates = wanted
            .into_iter()
            .map(|hash| (hash, watch::channel(false).0))
            .collect();
        Arc::new(Self {
            gates,
            requested: Mutex::new(Vec::new()),
            batches: watch::channel(0).0,
            closed: watch::channel(false).0,
        })
    }

    /// Let the fetch of `hash` resolve.
    pub fn open(&self, hash: &ChunkHash) {
        if let Some(gate) = self.gates.get(hash) {
            gate.send_replace(true);
        }
    }

    /// Hashes passed to `need_data`, in call order.
    pub fn requested(&self) -> Vec<ChunkHash> {
        self.requested.lock().unwrap().clone()
    }

    pub fn batches_done(&self) -> usize {
        *self.batches.borrow()
    }

    /// Wait until at least `count` batches completed.
    pub async fn wait_batches(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.batches.subscribe();
        tokio::time::timeout(timeout, async move {
            loop {
                if *rx.borrow_and_update() >= count {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Register this client under `name`, shared by every subscription.
    pub fn register(self: &Arc<Self>, registry: &mut Registry, name: &str) {
        let client = Arc::clone(self);
        registry.register_client(name, move |_, _, _| Ok(Arc::clone(&client) as Arc<dyn Client>));
    }
}

#[async_trait]
impl Client for TestClient {
    async fn need_data(&self, hash: &ChunkHash) -> Option<Fetch> {
        self.requested.lock().unwrap().push(*hash);
        let mut gate = self.gates.get(hash)?.subscribe();
        Some(Box::pin(async move {
            loop {
                if *gate.borrow_and_update() {
                    break Ok(());
                }
                if gate.changed().await.is_err() {
                    break Err(SyncError::Fetch("gate dropped".into()));
                }
            }
        }))
    }

    fn batch_done(
        &self,
        _stream: &StreamId,
        _until: u64,
        _last_hash: Option<&ChunkHash>,
        _handover: &HandoverProof,
    ) -> Option<BatchCompletion> {
        self.batches.send_modify(|n| *n += 1);
        None
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test server
// ─────────────────────────────────────────────────────────────────────────────

/// Server that answers `(from, to)` with one zero hash and `(from + 1, to + 1)`.
#[derive(Default)]
pub struct TestServer {
    fail: bool,
    cursors: Mutex<Vec<(u64, u64)>>,
    takeovers: Mutex<Vec<TakeoverProof>>,
    closed: Mutex<bool>,
}

impl TestServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Server whose every batch fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// Cursors passed to `set_next_batch`, in call order.
    pub fn cursors(&self) -> Vec<(u64, u64)> {
        self.cursors.lock().unwrap().clone()
    }

    pub fn takeovers(&self) -> Vec<TakeoverProof> {
        self.takeovers.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Register this server under `name`, shared by every subscription.
    pub fn register(self: &Arc<Self>, registry: &mut Registry, name: &str) {
        let server = Arc::clone(self);
        registry.register_server(name, move |_, _, _| Ok(Arc::clone(&server) as Arc<dyn Server>));
    }
}

#[async_trait]
impl Server for TestServer {
    async fn set_next_batch(&self, from: u64, to: u64) -> Result<Batch> {
        self.cursors.lock().unwrap().push((from, to));
        if self.fail {
            return Err(SyncError::Server("test server failure".into()));
        }
        Ok(Batch {
            hashes: Bytes::from(vec![0u8; HASH_SIZE]),
            from: from + 1,
            to: to + 1,
            proof: HandoverProof::default(),
        })
    }

    async fn get_data(&self, _hash: &ChunkHash) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    async fn take_over(&self, proof: TakeoverProof) -> Result<()> {
        self.takeovers.lock().unwrap().push(proof);
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streamer harness
// ─────────────────────────────────────────────────────────────────────────────

/// A running streamer with the test playing its only remote peer.
pub struct StreamerTester {
    pub network: Arc<MemoryNetwork>,
    pub streamer: Arc<Streamer<MemoryTransport>>,
    /// Transport of the peer the test plays.
    pub remote: MemoryTransport,
    run: JoinHandle<()>,
}

impl StreamerTester {
    /// Harness without chunk delivery, so the remote sees protocol messages only.
    pub async fn new(registry: Registry) -> Self {
        Self::with_config(
            registry,
            StreamerConfig {
                deliver_chunks: false,
                ..StreamerConfig::default()
            },
        )
        .await
    }

    pub async fn with_config(registry: Registry, config: StreamerConfig) -> Self {
        let network = MemoryNetwork::new();
        let local = network
            .create_transport(PeerId::from_bytes([0x01; 32]))
            .await;
        let remote = network
            .create_transport(PeerId::from_bytes([0x02; 32]))
            .await;

        let streamer = Arc::new(Streamer::new(Arc::new(registry), Arc::new(local), config));
        streamer.add_peer(remote.local_peer_id());

        let runner = Arc::clone(&streamer);
        let run = tokio::spawn(async move {
            let _ = runner.run().await;
        });

        Self {
            network,
            streamer,
            remote,
            run,
        }
    }

    /// Id of the peer the test plays.
    pub fn remote_id(&self) -> PeerId {
        self.remote.local_peer_id()
    }

    pub fn local_id(&self) -> PeerId {
        self.streamer.local_peer_id()
    }

    /// Subscribe the streamer to `stream` on the remote peer.
    pub fn subscribe(
        &self,
        stream: StreamId,
        history: Option<Range>,
        priority: Priority,
    ) -> Result<()> {
        self.streamer
            .subscribe(&self.remote_id(), stream, history, priority)
    }

    /// Send `message` to the streamer as the remote peer.
    pub async fn trigger(&self, message: impl Into<StreamMessage>) {
        self.remote
            .send(&self.local_id(), message.into())
            .await
            .unwrap_or_else(|e| panic!("trigger failed: {}", e));
    }

    /// Next message the streamer sent to the remote peer.
    pub async fn expect(&self) -> StreamMessage {
        match self.remote.recv_timeout(EXPECT_TIMEOUT).await {
            Ok(Some((from, message))) => {
                assert_eq!(from, self.local_id());
                message
            }
            Ok(None) => panic!("no message within {:?}", EXPECT_TIMEOUT),
            Err(e) => panic!("recv failed: {}", e),
        }
    }

    /// Assert the streamer sends nothing for `within`.
    pub async fn expect_silence(&self, within: Duration) {
        match self.remote.recv_timeout(within).await {
            Ok(None) => {}
            Ok(Some((_, message))) => panic!("unexpected message {:?}", message),
            Err(e) => panic!("recv failed: {}", e),
        }
    }
}

impl Drop for StreamerTester {
    fn drop(&mut self) {
        self.run.abort();
        self.streamer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkstream_core::join_hashes;
    use chunkstream_sync::{OfferedHashesMsg, SubscribeMsg};

    #[tokio::test]
    async fn test_fill_store_assigns_sequence() {
        let store = MemoryStore::new();
        let hashes = fill_store(&store, 3).await;
        assert_eq!(hashes.len(), 3);
        assert_eq!(store.head().await.unwrap(), 3);
        assert_eq!(hashes[0], ChunkHash::of(&chunk_data(0)));
    }

    #[tokio::test]
    async fn test_client_gate_blocks_until_opened() {
        let client = TestClient::wanting([hash(0)]);
        assert!(client.need_data(&hash(1)).await.is_none());

        let fetch = client.need_data(&hash(0)).await.unwrap();
        let task = tokio::spawn(fetch);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        client.open(&hash(0));
        task.await.unwrap().unwrap();
        assert_eq!(client.requested(), vec![hash(1), hash(0)]);
    }

    #[tokio::test]
    async fn test_harness_round_trip() {
        let client = TestClient::wanting(Vec::new());
        let mut registry = Registry::new();
        client.register(&mut registry, "foo");
        let tester = StreamerTester::new(registry).await;

        let stream = StreamId::new("foo", true);
        tester.subscribe(stream.clone(), None, Priority::Top).unwrap();
        assert_eq!(
            tester.expect().await,
            StreamMessage::from(SubscribeMsg {
                stream: stream.clone(),
                history: None,
                priority: Priority::Top,
            })
        );

        tester
            .trigger(OfferedHashesMsg {
                stream,
                from: 1,
                to: 2,
                hashes: join_hashes(&[hash(0)]),
                handover_proof: HandoverProof::default(),
            })
            .await;
        assert!(matches!(tester.expect().await, StreamMessage::WantedHashes(_)));
        assert!(client.wait_batches(1, EXPECT_TIMEOUT).await);
    }
}
