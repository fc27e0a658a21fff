//! Store-backed stream kind.
//!
//! Serves a store's sequence index as a stream and fetches missing chunks
//! into the local store. Cursors are half-open: a batch covering sequence
//! numbers `first..=last` is reported as `(first, last + 1)`, so the
//! client's next `from` is the first sequence number it has not seen.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use chunkstream_core::{join_hashes, ChunkHash, HandoverProof, StreamId, TakeoverProof};
use chunkstream_store::{ChunkStore, StoreError};
use chunkstream_sync::{
    Batch, BatchCompletion, ChunkSink, Client, Fetch, PeerId, Registry, Result, Server, SyncError,
};

fn server_error(e: StoreError) -> SyncError {
    SyncError::Server(e.to_string())
}

fn fetch_error(e: StoreError) -> SyncError {
    SyncError::Fetch(e.to_string())
}

/// Offers a store's chunks in sequence order.
pub struct StoreServer<S> {
    store: Arc<S>,
    batch_size: usize,
}

impl<S: ChunkStore> StoreServer<S> {
    pub fn new(store: Arc<S>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl<S: ChunkStore + 'static> Server for StoreServer<S> {
    async fn set_next_batch(&self, from: u64, to: u64) -> Result<Batch> {
        let start = from.max(1);
        if to != 0 && to <= start {
            return Ok(Batch {
                from: start,
                to: start,
                ..Batch::default()
            });
        }

        if self.store.head().await.map_err(server_error)? < start {
            self.store
                .wait_for_head(start - 1)
                .await
                .map_err(server_error)?;
        }

        let until = if to == 0 { 0 } else { to - 1 };
        let entries = self
            .store
            .hashes_in(start - 1, until, self.batch_size)
            .await
            .map_err(server_error)?;

        let (first, last) = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => (first.0, last.0),
            _ => {
                return Ok(Batch {
                    from: start,
                    to: start,
                    ..Batch::default()
                })
            }
        };

        let hashes = join_hashes(entries.iter().map(|(_, hash)| hash));
        let root = ChunkHash::of(&hashes);
        Ok(Batch {
            hashes,
            from: first,
            to: last + 1,
            proof: HandoverProof::new(root.as_bytes().to_vec()),
        })
    }

    async fn get_data(&self, hash: &ChunkHash) -> Result<Bytes> {
        self.store
            .get(hash)
            .await
            .map_err(server_error)?
            .ok_or_else(|| SyncError::Server(format!("chunk {} not found", hash)))
    }

    async fn take_over(&self, proof: TakeoverProof) -> Result<()> {
        tracing::debug!(len = proof.as_bytes().len(), "batch taken over");
        Ok(())
    }
}

/// Fetches whatever the local store is missing.
pub struct StoreClient<S> {
    store: Arc<S>,
}

impl<S: ChunkStore> StoreClient<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ChunkStore + 'static> Client for StoreClient<S> {
    async fn need_data(&self, hash: &ChunkHash) -> Option<Fetch> {
        let store = Arc::clone(&self.store);
        let hash = *hash;
        match store.has(&hash).await {
            Ok(true) => None,
            Ok(false) => Some(Box::pin(async move {
                store.wait_for_chunk(&hash).await.map_err(fetch_error)
            })),
            Err(e) => Some(Box::pin(async move { Err::<(), _>(fetch_error(e)) })),
        }
    }

    /// The takeover proof echoes the handover root followed by the
    /// big-endian `until` cursor.
    fn batch_done(
        &self,
        stream: &StreamId,
        until: u64,
        _last_hash: Option<&ChunkHash>,
        handover: &HandoverProof,
    ) -> Option<BatchCompletion> {
        tracing::debug!(stream = %stream, until, "batch stored");
        let mut payload = handover.as_bytes().to_vec();
        payload.extend_from_slice(&until.to_be_bytes());
        Some(Box::pin(async move {
            Ok::<_, SyncError>(TakeoverProof::new(payload))
        }))
    }
}

/// Writes pushed chunks into the store after checking their address.
pub struct StoreSink<S> {
    store: Arc<S>,
}

impl<S: ChunkStore> StoreSink<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ChunkStore + 'static> ChunkSink for StoreSink<S> {
    async fn deliver(&self, peer: &PeerId, hash: ChunkHash, data: Bytes) -> Result<()> {
        match self.store.put_verified(&hash, data).await {
            Ok(_) => Ok(()),
            Err(e @ StoreError::HashMismatch { .. }) => {
                tracing::warn!(peer = %peer, hash = %hash, "delivered chunk does not match its hash");
                Err(SyncError::InvalidMessage(e.to_string()))
            }
            Err(e) => Err(fetch_error(e)),
        }
    }
}

/// Register the store-backed client and server under `name`.
pub fn register_store_stream<S>(registry: &mut Registry, name: &str, store: Arc<S>, batch_size: usize)
where
    S: ChunkStore + 'static,
{
    let client_store = Arc::clone(&store);
    registry.register_client(name, move |_, _, _| {
        Ok(Arc::new(StoreClient::new(Arc::clone(&client_store))) as Arc<dyn Client>)
    });
    registry.register_server(name, move |_, _, _| {
        Ok(Arc::new(StoreServer::new(Arc::clone(&store), batch_size)) as Arc<dyn Server>)
    });
}
