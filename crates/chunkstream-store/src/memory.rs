//! In-memory implementation of the ChunkStore trait.
//!
//! All data is lost when the store is dropped. Arrivals are announced on a
//! watch channel carrying the current head, which is what waiters park on.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use chunkstream_core::ChunkHash;

use crate::error::{Result, StoreError};
use crate::traits::{ChunkStore, InsertResult};

/// In-memory chunk store. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    head: watch::Sender<u64>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Chunks indexed by address, with their sequence number.
    chunks: HashMap<ChunkHash, (u64, Bytes)>,

    /// Sequence index: seq -> address.
    index: BTreeMap<u64, ChunkHash>,

    /// Last assigned sequence number.
    head: u64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            head,
        }
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.read().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, hash: ChunkHash, data: Bytes) -> InsertResult {
        let result = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if let Some((seq, _)) = inner.chunks.get(&hash) {
                return InsertResult::AlreadyExists(*seq);
            }
            inner.head += 1;
            let seq = inner.head;
            inner.chunks.insert(hash, (seq, data));
            inner.index.insert(seq, hash);
            InsertResult::Inserted(seq)
        };
        self.head.send_replace(result.seq());
        tracing::trace!(hash = %hash, seq = result.seq(), "chunk stored");
        result
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn put(&self, data: Bytes) -> Result<(ChunkHash, InsertResult)> {
        let hash = ChunkHash::of(&data);
        Ok((hash, self.insert(hash, data)))
    }

    async fn put_verified(&self, hash: &ChunkHash, data: Bytes) -> Result<InsertResult> {
        let actual = ChunkHash::of(&data);
        if actual != *hash {
            return Err(StoreError::HashMismatch {
                expected: *hash,
                actual,
            });
        }
        Ok(self.insert(actual, data))
    }

    async fn get(&self, hash: &ChunkHash) -> Result<Option<Bytes>> {
        Ok(self.read().chunks.get(hash).map(|(_, data)| data.clone()))
    }

    async fn has(&self, hash: &ChunkHash) -> Result<bool> {
        Ok(self.read().chunks.contains_key(hash))
    }

    async fn head(&self) -> Result<u64> {
        Ok(self.read().head)
    }

    async fn hashes_in(&self, after: u64, until: u64, limit: usize) -> Result<Vec<(u64, ChunkHash)>> {
        let inner = self.read();
        let upper = if until == 0 { u64::MAX } else { until };
        if after >= upper {
            return Ok(Vec::new());
        }
        Ok(inner
            .index
            .range(after + 1..=upper)
            .take(limit)
            .map(|(seq, hash)| (*seq, *hash))
            .collect())
    }

    async fn wait_for_chunk(&self, hash: &ChunkHash) -> Result<()> {
        // Subscribe before checking so an insert in between is not missed.
        let mut rx = self.head.subscribe();
        loop {
            if self.read().chunks.contains_key(hash) {
                return Ok(());
            }
            rx.changed().await.map_err(|_| StoreError::Closed)?;
        }
    }

    async fn wait_for_head(&self, after: u64) -> Result<u64> {
        let mut rx = self.head.subscribe();
        loop {
            let head = self.read().head;
            if head > after {
                return Ok(head);
            }
            rx.changed().await.map_err(|_| StoreError::Closed)?;
        }
    }
}
