//! Capability registry: stream-kind names to client/server factories.
//!
//! Built mutably at startup, then frozen behind an `Arc` and handed to the
//! [`Streamer`](crate::Streamer).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chunkstream_core::StreamId;

use crate::client::Client;
use crate::error::{Result, SyncError};
use crate::messages::PeerId;
use crate::server::Server;

/// Builds a [`Client`] for `(peer, key, live)`.
pub type ClientFactory =
    Arc<dyn Fn(&PeerId, Option<&[u8]>, bool) -> Result<Arc<dyn Client>> + Send + Sync>;

/// Builds a [`Server`] for `(peer, key, live)`.
pub type ServerFactory =
    Arc<dyn Fn(&PeerId, Option<&[u8]>, bool) -> Result<Arc<dyn Server>> + Send + Sync>;

/// Name-keyed factory tables.
#[derive(Clone, Default)]
pub struct Registry {
    clients: HashMap<String, ClientFactory>,
    servers: HashMap<String, ServerFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the client factory for `name`, replacing any previous one.
    pub fn register_client<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&PeerId, Option<&[u8]>, bool) -> Result<Arc<dyn Client>> + Send + Sync + 'static,
    {
        self.clients.insert(name.into(), Arc::new(factory));
    }

    /// Install the server factory for `name`, replacing any previous one.
    pub fn register_server<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&PeerId, Option<&[u8]>, bool) -> Result<Arc<dyn Server>> + Send + Sync + 'static,
    {
        self.servers.insert(name.into(), Arc::new(factory));
    }

    pub fn client_factory(&self, name: &str) -> Result<&ClientFactory> {
        self.clients
            .get(name)
            .ok_or_else(|| SyncError::NotRegistered(name.to_string()))
    }

    pub fn server_factory(&self, name: &str) -> Result<&ServerFactory> {
        self.servers
            .get(name)
            .ok_or_else(|| SyncError::NotRegistered(name.to_string()))
    }

    /// Instantiate a client for `stream` with `peer`.
    pub fn new_client(&self, peer: &PeerId, stream: &StreamId) -> Result<Arc<dyn Client>> {
        let factory = self.client_factory(stream.name())?;
        factory(peer, stream.key(), stream.is_live())
    }

    /// Instantiate a server for `stream` with `peer`.
    pub fn new_server(&self, peer: &PeerId, stream: &StreamId) -> Result<Arc<dyn Server>> {
        let factory = self.server_factory(stream.name())?;
        factory(peer, stream.key(), stream.is_live())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clients: Vec<_> = self.clients.keys().collect();
        let mut servers: Vec<_> = self.servers.keys().collect();
        clients.sort();
        servers.sort();
        f.debug_struct("Registry")
            .field("clients", &clients)
            .field("servers", &servers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BatchCompletion, Fetch};
    use crate::server::Batch;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chunkstream_core::{ChunkHash, HandoverProof};

    struct NoopClient;

    #[async_trait]
    impl Client for NoopClient {
        async fn need_data(&self, _hash: &ChunkHash) -> Option<Fetch> {
            None
        }

        fn batch_done(
            &self,
            _stream: &StreamId,
            _until: u64,
            _last_hash: Option<&ChunkHash>,
            _handover: &HandoverProof,
        ) -> Option<BatchCompletion> {
            None
        }
    }

    struct NoopServer;

    #[async_trait]
    impl Server for NoopServer {
        async fn set_next_batch(&self, from: u64, to: u64) -> Result<Batch> {
            Ok(Batch {
                from,
                to,
                ..Batch::default()
            })
        }

        async fn get_data(&self, _hash: &ChunkHash) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }

    #[test]
    fn test_unregistered_name_is_reported() {
        let registry = Registry::new();
        let peer = PeerId::from_bytes([1; 32]);
        let err = registry
            .new_client(&peer, &StreamId::new("bar", true))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "stream bar not registered");

        let err = registry
            .new_server(&peer, &StreamId::new("bar", false))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "stream bar not registered");
    }

    #[test]
    fn test_factory_sees_key_and_live() {
        let mut registry = Registry::new();
        registry.register_server("foo", |_peer, key, live| {
            assert_eq!(key, Some(&[9u8][..]));
            assert!(live);
            Ok(Arc::new(NoopServer) as Arc<dyn Server>)
        });
        let peer = PeerId::from_bytes([1; 32]);
        assert!(registry
            .new_server(&peer, &StreamId::with_key("foo", vec![9u8], true))
            .is_ok());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = Registry::new();
        registry.register_client("foo", |_, _, _| Ok(Arc::new(NoopClient) as Arc<dyn Client>));
        registry.register_client("foo", |_, _, _| {
            Err(SyncError::InvalidMessage("replaced".into()))
        });

        let peer = PeerId::from_bytes([1; 32]);
        let err = registry
            .new_client(&peer, &StreamId::new("foo", true))
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
        assert_eq!(format!("{:?}", registry), "Registry { clients: [\"foo\"], servers: [] }");
    }
}
