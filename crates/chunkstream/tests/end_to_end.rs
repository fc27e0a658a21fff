//! Two store-backed nodes syncing chunks over the in-memory network.

use std::time::Duration;

use tokio::sync::broadcast;

use chunkstream::core::{ChunkHash, Priority, Range, StreamId};
use chunkstream::store::{ChunkStore, MemoryStore};
use chunkstream::sync::{MemoryNetwork, MemoryTransport, PeerId, Registry, StreamEvent};
use chunkstream::{Node, NodeConfig};
use chunkstream_testkit::{chunk_data, random_chunk, TestClient};

const TIMEOUT: Duration = Duration::from_secs(10);

type MemoryNode = Node<MemoryStore, MemoryTransport>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn node(network: &std::sync::Arc<MemoryNetwork>, id: u8, config: NodeConfig) -> MemoryNode {
    let transport = network.create_transport(PeerId::from_bytes([id; 32])).await;
    let node = Node::new(MemoryStore::new(), transport, config);
    node.spawn();
    node
}

async fn wait_for(
    events: &mut broadcast::Receiver<StreamEvent>,
    what: &str,
    matches: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    let found = tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    found.unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

async fn put_all(node: &MemoryNode, count: usize) -> Vec<ChunkHash> {
    let mut hashes = Vec::new();
    for i in 0..count {
        hashes.push(node.put(chunk_data(i)).await.unwrap());
    }
    hashes
}

#[tokio::test]
async fn test_live_sync_follows_new_chunks() {
    init_tracing();
    let network = MemoryNetwork::new();
    let alice = node(&network, 0xA1, NodeConfig::default()).await;
    let bob = node(&network, 0xB0, NodeConfig::default()).await;
    let mut events = bob.events();

    let hashes = put_all(&alice, 5).await;

    bob.connect(alice.local_peer_id());
    alice.connect(bob.local_peer_id());
    bob.sync_from(&alice.local_peer_id(), true, None, Priority::Mid)
        .unwrap();

    wait_for(&mut events, "first batch", |e| {
        matches!(e, StreamEvent::BatchCompleted { until: 6, .. })
    })
    .await;
    for hash in &hashes {
        assert_eq!(
            bob.get(hash).await.unwrap(),
            alice.get(hash).await.unwrap(),
        );
    }

    // New chunks at the source flow through the open subscription.
    let late = alice.put(random_chunk(4096)).await.unwrap();
    wait_for(&mut events, "live batch", |e| {
        matches!(e, StreamEvent::BatchCompleted { until: 7, .. })
    })
    .await;
    assert!(bob.store().has(&late).await.unwrap());
    assert_eq!(bob.store().len(), 6);
}

#[tokio::test]
async fn test_history_sync_copies_only_the_range() {
    init_tracing();
    let network = MemoryNetwork::new();
    let alice = node(&network, 0xA2, NodeConfig::default()).await;
    let bob = node(&network, 0xB2, NodeConfig::default()).await;
    let mut bob_events = bob.events();
    let mut alice_events = alice.events();

    let hashes = put_all(&alice, 5).await;

    bob.connect(alice.local_peer_id());
    alice.connect(bob.local_peer_id());
    bob.sync_from(
        &alice.local_peer_id(),
        false,
        Some(Range::new(1, 4)),
        Priority::High,
    )
    .unwrap();

    wait_for(&mut bob_events, "history batch", |e| {
        matches!(e, StreamEvent::BatchCompleted { until: 4, .. })
    })
    .await;
    wait_for(&mut alice_events, "history served", |e| {
        matches!(e, StreamEvent::HistoryServed { .. })
    })
    .await;

    for hash in &hashes[..3] {
        assert!(bob.store().has(hash).await.unwrap());
    }
    for hash in &hashes[3..] {
        assert!(!bob.store().has(hash).await.unwrap());
    }
}

#[tokio::test]
async fn test_small_batches_sync_everything() {
    init_tracing();
    let network = MemoryNetwork::new();
    let config = NodeConfig {
        batch_size: 3,
        ..NodeConfig::default()
    };
    let alice = node(&network, 0xA3, config.clone()).await;
    let bob = node(&network, 0xB3, config).await;
    let mut events = bob.events();

    // Bob already holds some of what alice offers.
    let hashes = put_all(&alice, 10).await;
    for i in [2usize, 5, 6] {
        bob.put(chunk_data(i)).await.unwrap();
    }

    bob.connect(alice.local_peer_id());
    alice.connect(bob.local_peer_id());
    bob.sync_from(&alice.local_peer_id(), true, None, Priority::Low)
        .unwrap();

    wait_for(&mut events, "last batch", |e| {
        matches!(e, StreamEvent::BatchCompleted { until: 11, .. })
    })
    .await;
    for hash in &hashes {
        assert!(bob.store().has(hash).await.unwrap());
    }
    assert_eq!(bob.store().len(), 10);
}

#[tokio::test]
async fn test_unknown_stream_is_refused_by_peer() {
    init_tracing();
    let network = MemoryNetwork::new();
    let alice = node(&network, 0xA4, NodeConfig::default()).await;

    let client = TestClient::wanting(Vec::new());
    let mut registry = Registry::new();
    client.register(&mut registry, "EXTRA");
    let transport = network.create_transport(PeerId::from_bytes([0xB4; 32])).await;
    let bob = Node::with_registry(
        std::sync::Arc::new(MemoryStore::new()),
        transport,
        registry,
        NodeConfig::default(),
    );
    bob.spawn();
    let mut events = bob.events();

    bob.connect(alice.local_peer_id());
    alice.connect(bob.local_peer_id());
    bob.subscribe(
        &alice.local_peer_id(),
        StreamId::new("EXTRA", true),
        None,
        Priority::Top,
    )
    .unwrap();

    match wait_for(&mut events, "refusal", |e| {
        matches!(e, StreamEvent::SubscribeRefused { .. })
    })
    .await
    {
        StreamEvent::SubscribeRefused { peer, error } => {
            assert_eq!(peer, alice.local_peer_id());
            assert_eq!(error, "stream EXTRA not registered");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_unsubscribe_stops_serving() {
    init_tracing();
    let network = MemoryNetwork::new();
    let alice = node(&network, 0xA5, NodeConfig::default()).await;
    let bob = node(&network, 0xB5, NodeConfig::default()).await;
    let mut events = bob.events();

    put_all(&alice, 2).await;
    bob.connect(alice.local_peer_id());
    alice.connect(bob.local_peer_id());
    bob.sync_from(&alice.local_peer_id(), true, None, Priority::Mid)
        .unwrap();
    wait_for(&mut events, "first batch", |e| {
        matches!(e, StreamEvent::BatchCompleted { until: 3, .. })
    })
    .await;

    let stream = bob.stream(true);
    assert!(bob.unsubscribe(&alice.local_peer_id(), &stream).unwrap());

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let serving = alice
            .streamer()
            .peer(&bob.local_peer_id())
            .map(|peer| peer.has_server(&stream))
            .unwrap_or(false);
        if !serving {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "alice still serving");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    alice.put(chunk_data(99)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bob.store().len(), 2);
}
