//! Transport abstraction for the stream protocol.
//!
//! The transport delivers messages over an ordered, authenticated
//! point-to-point session per peer. Implementations may use any framing;
//! the in-memory one ships encoded frames so the wire codec is exercised.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::messages::{PeerId, StreamMessage};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Transport trait for sending and receiving stream messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a specific peer.
    async fn send(&self, peer: &PeerId, message: StreamMessage) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// Returns the sender's PeerId and the message. A frame that fails to
    /// decode yields [`SyncError::Codec`]; the transport stays usable.
    async fn recv(&self) -> Result<(PeerId, StreamMessage)>;

    /// Receive with timeout.
    ///
    /// Returns None if timeout expires before a message arrives.
    async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<(PeerId, StreamMessage)>>;

    /// Get the local peer's identity.
    fn local_peer_id(&self) -> PeerId;

    /// List currently connected peers.
    async fn connected_peers(&self) -> Result<Vec<PeerId>>;

    /// Check if a specific peer is connected.
    async fn is_connected(&self, peer: &PeerId) -> bool;
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate frame passing between peers.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    /// Frame envelope for internal routing.
    #[derive(Debug, Clone)]
    struct Envelope {
        from: PeerId,
        frame: Vec<u8>,
    }

    /// Shared state for the memory transport network.
    pub struct MemoryNetwork {
        /// Sender channels for each peer.
        senders: RwLock<HashMap<PeerId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, peer_id: PeerId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1000);

            self.senders.write().await.insert(peer_id, tx);

            MemoryTransport {
                peer_id,
                network: Arc::clone(self),
                receiver: RwLock::new(rx),
            }
        }

        /// Disconnect a peer; later sends to it fail.
        pub async fn disconnect(&self, peer_id: &PeerId) {
            self.senders.write().await.remove(peer_id);
        }

        /// Inject a raw frame as if `from` had sent it to `to`.
        pub async fn inject_frame(&self, from: PeerId, to: &PeerId, frame: Vec<u8>) -> Result<()> {
            let senders = self.senders.read().await;
            let sender = senders
                .get(to)
                .ok_or_else(|| SyncError::TransportError("peer not found".into()))?;
            sender
                .send(Envelope { from, frame })
                .await
                .map_err(|_| SyncError::TransportError("peer disconnected".into()))
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                senders: RwLock::new(HashMap::new()),
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        peer_id: PeerId,
        network: Arc<MemoryNetwork>,
        receiver: RwLock<mpsc::Receiver<Envelope>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &PeerId, message: StreamMessage) -> Result<()> {
            let frame = message.encode()?;
            self.network.inject_frame(self.peer_id, peer, frame).await
        }

        async fn recv(&self) -> Result<(PeerId, StreamMessage)> {
            let mut rx = self.receiver.write().await;
            match rx.recv().await {
                Some(envelope) => Ok((envelope.from, StreamMessage::decode(&envelope.frame)?)),
                None => Err(SyncError::TransportError("channel closed".into())),
            }
        }

        async fn recv_timeout(
            &self,
            timeout: std::time::Duration,
        ) -> Result<Option<(PeerId, StreamMessage)>> {
            let mut rx = self.receiver.write().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => {
                    Ok(Some((envelope.from, StreamMessage::decode(&envelope.frame)?)))
                }
                Ok(None) => Err(SyncError::TransportError("channel closed".into())),
                Err(_) => Ok(None), // Timeout
            }
        }

        fn local_peer_id(&self) -> PeerId {
            self.peer_id
        }

        async fn connected_peers(&self) -> Result<Vec<PeerId>> {
            let senders = self.network.senders.read().await;
            Ok(senders
                .keys()
                .filter(|id| *id != &self.peer_id)
                .copied()
                .collect())
        }

        async fn is_connected(&self, peer: &PeerId) -> bool {
            let senders = self.network.senders.read().await;
            senders.contains_key(peer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use crate::messages::{SubscribeMsg, UnsubscribeMsg};
    use chunkstream_core::{Priority, StreamId};

    #[tokio::test]
    async fn test_memory_transport_send_recv() {
        let network = MemoryNetwork::new();

        let peer_a = PeerId::from_bytes([0xAA; 32]);
        let peer_b = PeerId::from_bytes([0xBB; 32]);

        let transport_a = network.create_transport(peer_a).await;
        let transport_b = network.create_transport(peer_b).await;

        let msg: StreamMessage = SubscribeMsg {
            stream: StreamId::new("foo", true),
            history: None,
            priority: Priority::Top,
        }
        .into();

        transport_a.send(&peer_b, msg.clone()).await.unwrap();

        let (from, received) = transport_b.recv().await.unwrap();
        assert_eq!(from, peer_a);
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_memory_transport_bad_frame_is_codec_error() {
        let network = MemoryNetwork::new();
        let peer_a = PeerId::from_bytes([0xAA; 32]);
        let peer_b = PeerId::from_bytes([0xBB; 32]);
        let transport_b = network.create_transport(peer_b).await;

        network.inject_frame(peer_a, &peer_b, vec![0xee]).await.unwrap();
        let err = transport_b.recv().await.unwrap_err();
        assert!(matches!(err, SyncError::Codec(_)));

        // The transport keeps working after a bad frame.
        let msg: StreamMessage = UnsubscribeMsg {
            stream: StreamId::new("foo", false),
        }
        .into();
        network
            .inject_frame(peer_a, &peer_b, msg.encode().unwrap())
            .await
            .unwrap();
        let (_, received) = transport_b.recv().await.unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_send_to_disconnected_peer_fails() {
        let network = MemoryNetwork::new();
        let peer_a = PeerId::from_bytes([0xAA; 32]);
        let peer_b = PeerId::from_bytes([0xBB; 32]);
        let transport_a = network.create_transport(peer_a).await;
        let _transport_b = network.create_transport(peer_b).await;

        assert!(transport_a.is_connected(&peer_b).await);
        network.disconnect(&peer_b).await;
        assert!(!transport_a.is_connected(&peer_b).await);

        let msg: StreamMessage = UnsubscribeMsg {
            stream: StreamId::new("foo", false),
        }
        .into();
        assert!(transport_a.send(&peer_b, msg).await.is_err());
    }
}
