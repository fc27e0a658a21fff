//! Requesting side of a subscription.
//!
//! A [`Client`] is supplied by a registered factory and decides, hash by
//! hash, what the local store is missing. The batch fetcher turns an offer
//! into a want-mask plus one fetch task per wanted hash, and only reports
//! the batch done once every fetch resolved.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use chunkstream_core::{ChunkHash, HandoverProof, StreamId, TakeoverProof, WantMask};

use crate::error::{Result, SyncError};

/// Pending fetch of one missing chunk. Resolves once the chunk arrived.
pub type Fetch = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// Pending completion of a batch, yielding the proof sent back upstream.
pub type BatchCompletion = Pin<Box<dyn Future<Output = Result<TakeoverProof>> + Send + 'static>>;

/// Store-side capability of the requesting end.
#[async_trait]
pub trait Client: Send + Sync {
    /// `None` when the chunk is already held, otherwise a fetch that
    /// resolves when it arrives.
    async fn need_data(&self, hash: &ChunkHash) -> Option<Fetch>;

    /// Called once per batch after every wanted chunk arrived.
    ///
    /// Returning `None` means no takeover proof is sent for this batch.
    fn batch_done(
        &self,
        stream: &StreamId,
        until: u64,
        last_hash: Option<&ChunkHash>,
        handover: &HandoverProof,
    ) -> Option<BatchCompletion>;

    /// Release resources; called when the subscription is torn down.
    fn close(&self) {}
}

/// An offer split into what is wanted and how to fetch it.
pub(crate) struct PreparedBatch {
    pub mask: WantMask,
    pub fetches: Vec<Fetch>,
}

/// Ask the client about every offered hash, in offer order.
pub(crate) async fn prepare_batch(client: &dyn Client, hashes: &[ChunkHash]) -> Result<PreparedBatch> {
    let mut mask = WantMask::new(hashes.len());
    let mut fetches = Vec::new();
    for (i, hash) in hashes.iter().enumerate() {
        if let Some(fetch) = client.need_data(hash).await {
            mask.set(i)?;
            fetches.push(fetch);
        }
    }
    Ok(PreparedBatch { mask, fetches })
}

/// Everything needed to finish one batch after the want-response went out.
pub(crate) struct PendingBatch {
    pub stream: StreamId,
    pub until: u64,
    pub last_hash: Option<ChunkHash>,
    pub handover: HandoverProof,
    pub fetches: Vec<Fetch>,
}

/// Wait for every fetch, then run the client's completion.
///
/// Fetches run as independent tasks. The first failure ends the batch and
/// drops the set, which aborts the fetches still pending.
pub(crate) async fn complete_batch(
    client: Arc<dyn Client>,
    batch: PendingBatch,
) -> Result<Option<TakeoverProof>> {
    let mut pending = JoinSet::new();
    for fetch in batch.fetches {
        pending.spawn(fetch);
    }

    while let Some(joined) = pending.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(SyncError::Fetch(e.to_string())),
        }
    }

    match client.batch_done(
        &batch.stream,
        batch.until,
        batch.last_hash.as_ref(),
        &batch.handover,
    ) {
        Some(completion) => completion.await.map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use std::sync::Mutex;

    /// Wants every hash except those in `held`; each fetch waits on a oneshot.
    struct GateClient {
        held: Vec<ChunkHash>,
        gates: Mutex<HashMap<ChunkHash, oneshot::Receiver<Result<()>>>>,
        done: AtomicUsize,
    }

    impl GateClient {
        fn new(held: Vec<ChunkHash>) -> (Arc<Self>, HashMap<ChunkHash, oneshot::Sender<Result<()>>>) {
            let mut senders = HashMap::new();
            let mut gates = HashMap::new();
            for i in 0..3u8 {
                let hash = ChunkHash::of(&[i]);
                let (tx, rx) = oneshot::channel();
                senders.insert(hash, tx);
                gates.insert(hash, rx);
            }
            let client = Arc::new(Self {
                held,
                gates: Mutex::new(gates),
                done: AtomicUsize::new(0),
            });
            (client, senders)
        }
    }

    #[async_trait]
    impl Client for GateClient {
        async fn need_data(&self, hash: &ChunkHash) -> Option<Fetch> {
            if self.held.contains(hash) {
                return None;
            }
            let gate = self.gates.lock().unwrap().remove(hash)?;
            Some(Box::pin(async move {
                gate.await.map_err(|_| SyncError::Fetch("gate dropped".into()))?
            }))
        }

        fn batch_done(
            &self,
            _stream: &StreamId,
            until: u64,
            _last_hash: Option<&ChunkHash>,
            _handover: &HandoverProof,
        ) -> Option<BatchCompletion> {
            self.done.fetch_add(1, Ordering::SeqCst);
            Some(Box::pin(async move {
                Ok::<_, SyncError>(TakeoverProof::new(until.to_be_bytes().to_vec()))
            }))
        }
    }

    fn hashes() -> Vec<ChunkHash> {
        (0..3u8).map(|i| ChunkHash::of(&[i])).collect()
    }

    fn pending(fetches: Vec<Fetch>) -> PendingBatch {
        PendingBatch {
            stream: StreamId::new("foo", true),
            until: 8,
            last_hash: hashes().last().copied(),
            handover: HandoverProof::default(),
            fetches,
        }
    }

    #[tokio::test]
    async fn test_mask_excludes_held_hash() {
        let (client, _gates) = GateClient::new(vec![ChunkHash::of(&[1])]);
        let prepared = prepare_batch(client.as_ref(), &hashes()).await.unwrap();

        assert_eq!(prepared.mask.as_bytes(), &[0x05]);
        assert_eq!(prepared.fetches.len(), 2);
    }

    #[tokio::test]
    async fn test_completion_waits_for_every_fetch() {
        let (client, mut gates) = GateClient::new(vec![ChunkHash::of(&[1])]);
        let prepared = prepare_batch(client.as_ref(), &hashes()).await.unwrap();

        let task = tokio::spawn(complete_batch(
            client.clone() as Arc<dyn Client>,
            pending(prepared.fetches),
        ));

        gates.remove(&ChunkHash::of(&[0])).unwrap().send(Ok(())).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        assert_eq!(client.done.load(Ordering::SeqCst), 0);

        gates.remove(&ChunkHash::of(&[2])).unwrap().send(Ok(())).unwrap();
        let proof = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("batch should complete")
            .unwrap()
            .unwrap();

        assert_eq!(proof, Some(TakeoverProof::new(8u64.to_be_bytes().to_vec())));
        assert_eq!(client.done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_batch() {
        let (client, mut gates) = GateClient::new(vec![]);
        let prepared = prepare_batch(client.as_ref(), &hashes()).await.unwrap();
        assert_eq!(prepared.mask.count(), 3);

        let task = tokio::spawn(complete_batch(
            client.clone() as Arc<dyn Client>,
            pending(prepared.fetches),
        ));
        gates
            .remove(&ChunkHash::of(&[1]))
            .unwrap()
            .send(Err(SyncError::Fetch("store gave up".into())))
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("batch should fail promptly")
            .unwrap();
        assert!(matches!(result, Err(SyncError::Fetch(_))));
        assert_eq!(client.done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nothing_wanted_completes_immediately() {
        let (client, _gates) = GateClient::new(hashes());
        let prepared = prepare_batch(client.as_ref(), &hashes()).await.unwrap();
        assert_eq!(prepared.mask.count(), 0);

        let proof = complete_batch(client.clone() as Arc<dyn Client>, pending(prepared.fetches))
            .await
            .unwrap();
        assert!(proof.is_some());
    }
}
