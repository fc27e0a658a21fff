//! Offering side of a subscription.
//!
//! A [`Server`] is supplied by a registered factory and cuts a stream into
//! batches. The negotiator drives one server: offer a batch, wait for the
//! matching want-response, push the wanted chunks, advance the cursor.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use chunkstream_core::{
    hash_count, ChunkHash, HandoverProof, Priority, Range, StreamId, TakeoverProof, WantMask,
    HASH_SIZE,
};

use crate::error::Result;
use crate::messages::{ChunkDeliveryMsg, OfferedHashesMsg, WantedHashesMsg};
use crate::queue::Outbox;

/// One batch produced by a [`Server`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Concatenated hashes, `HASH_SIZE` bytes each.
    pub hashes: Bytes,
    /// Range covered by this batch, reported to the client as is.
    pub from: u64,
    pub to: u64,
    pub proof: HandoverProof,
}

/// Store-side capability of the offering end.
#[async_trait]
pub trait Server: Send + Sync {
    /// Produce the next batch for the cursor `(from, to)`; `to == 0` is open.
    ///
    /// May wait until the stream has something to offer.
    async fn set_next_batch(&self, from: u64, to: u64) -> Result<Batch>;

    /// Read the data of an offered chunk the client asked for.
    async fn get_data(&self, hash: &ChunkHash) -> Result<Bytes>;

    /// Accept the client's proof that a batch was received in full.
    async fn take_over(&self, _proof: TakeoverProof) -> Result<()> {
        Ok(())
    }

    /// Release resources; called when the subscription is torn down.
    fn close(&self) {}
}

/// How a negotiation ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NegotiationEnd {
    /// The want channel closed: the subscription was torn down.
    Stopped,
    /// The requested history range has been offered in full.
    HistoryServed,
}

/// Fixed parameters of one server-side negotiation.
pub(crate) struct Negotiation {
    pub stream: StreamId,
    pub history: Option<Range>,
    pub priority: Priority,
    pub deliver_chunks: bool,
}

/// Drive `server` until the subscription stops, the history is served, or
/// something fails.
pub(crate) async fn negotiate(
    server: &dyn Server,
    outbox: &Outbox,
    negotiation: &Negotiation,
    wants: &mut mpsc::UnboundedReceiver<WantedHashesMsg>,
) -> Result<NegotiationEnd> {
    let mut cursor = negotiation.history.unwrap_or_default();

    loop {
        let batch = server.set_next_batch(cursor.from, cursor.to).await?;
        let count = hash_count(&batch.hashes)?;

        tracing::debug!(
            stream = %negotiation.stream,
            from = batch.from,
            to = batch.to,
            count,
            "offering batch"
        );
        let offer = OfferedHashesMsg {
            stream: negotiation.stream.clone(),
            from: batch.from,
            to: batch.to,
            hashes: batch.hashes.clone(),
            handover_proof: batch.proof,
        };
        if !outbox.send(negotiation.priority, offer.into()) {
            return Ok(NegotiationEnd::Stopped);
        }

        let Some(want) = wants.recv().await else {
            return Ok(NegotiationEnd::Stopped);
        };
        let mask = WantMask::from_bytes(&want.want, count)?;

        if negotiation.deliver_chunks {
            for i in mask.wanted() {
                let hash = ChunkHash::try_from(&batch.hashes[i * HASH_SIZE..(i + 1) * HASH_SIZE])?;
                let data = server.get_data(&hash).await?;
                outbox.send(negotiation.priority, ChunkDeliveryMsg { hash, data }.into());
            }
        }

        cursor = match negotiation.history {
            Some(history) if !history.is_open() => {
                if want.from >= history.to {
                    return Ok(NegotiationEnd::HistoryServed);
                }
                Range::new(want.from, history.to)
            }
            _ => Range::new(want.from, want.to),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::messages::StreamMessage;
    use crate::queue::outbox;
    use chunkstream_core::join_hashes;
    use std::sync::Mutex;

    /// Serves `(from + 1, to + 1)` with the given hashes; records cursors.
    struct StepServer {
        hashes: Vec<ChunkHash>,
        cursors: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl Server for StepServer {
        async fn set_next_batch(&self, from: u64, to: u64) -> Result<Batch> {
            self.cursors.lock().unwrap().push((from, to));
            Ok(Batch {
                hashes: join_hashes(&self.hashes),
                from: from + 1,
                to: to + 1,
                proof: HandoverProof::default(),
            })
        }

        async fn get_data(&self, hash: &ChunkHash) -> Result<Bytes> {
            Ok(Bytes::copy_from_slice(&hash.as_bytes()[..4]))
        }
    }

    struct FailingServer;

    #[async_trait]
    impl Server for FailingServer {
        async fn set_next_batch(&self, _from: u64, _to: u64) -> Result<Batch> {
            Err(SyncError::Server("index unavailable".into()))
        }

        async fn get_data(&self, hash: &ChunkHash) -> Result<Bytes> {
            Err(SyncError::Server(format!("no data for {}", hash)))
        }
    }

    fn negotiation(stream: StreamId, history: Option<Range>) -> Negotiation {
        Negotiation {
            stream,
            history,
            priority: Priority::Mid,
            deliver_chunks: true,
        }
    }

    #[tokio::test]
    async fn test_history_stops_once_served() {
        let server = StepServer {
            hashes: vec![ChunkHash::of(b"a"), ChunkHash::of(b"b")],
            cursors: Mutex::new(Vec::new()),
        };
        let (out, mut queues) = outbox();
        let (want_tx, mut want_rx) = mpsc::unbounded_channel();
        let stream = StreamId::new("foo", false);
        let negotiation = negotiation(stream.clone(), Some(Range::new(5, 8)));

        want_tx
            .send(WantedHashesMsg {
                stream: stream.clone(),
                want: Bytes::from_static(&[0x02]),
                from: 9,
                to: 0,
            })
            .unwrap();

        let end = negotiate(&server, &out, &negotiation, &mut want_rx).await.unwrap();
        assert_eq!(end, NegotiationEnd::HistoryServed);
        assert_eq!(*server.cursors.lock().unwrap(), vec![(5, 8)]);

        match queues.mid.try_recv().unwrap() {
            StreamMessage::OfferedHashes(m) => {
                assert_eq!((m.from, m.to), (6, 9));
                assert_eq!(m.hashes.len(), 2 * HASH_SIZE);
            }
            other => panic!("expected offer, got {:?}", other),
        }
        match queues.mid.try_recv().unwrap() {
            StreamMessage::ChunkDelivery(m) => assert_eq!(m.hash, ChunkHash::of(b"b")),
            other => panic!("expected delivery, got {:?}", other),
        }
        assert!(queues.mid.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_live_follows_client_cursor() {
        let server = StepServer {
            hashes: vec![],
            cursors: Mutex::new(Vec::new()),
        };
        let (out, _queues) = outbox();
        let (want_tx, mut want_rx) = mpsc::unbounded_channel();
        let stream = StreamId::new("foo", true);
        let negotiation = negotiation(stream.clone(), None);

        for from in [1u64, 2] {
            want_tx
                .send(WantedHashesMsg {
                    stream: stream.clone(),
                    want: Bytes::new(),
                    from,
                    to: 0,
                })
                .unwrap();
        }
        drop(want_tx);

        let end = negotiate(&server, &out, &negotiation, &mut want_rx).await.unwrap();
        assert_eq!(end, NegotiationEnd::Stopped);
        assert_eq!(*server.cursors.lock().unwrap(), vec![(0, 0), (1, 0), (2, 0)]);
    }

    #[tokio::test]
    async fn test_batch_failure_is_returned() {
        let (out, _queues) = outbox();
        let (_want_tx, mut want_rx) = mpsc::unbounded_channel();
        let negotiation = negotiation(StreamId::new("foo", true), None);

        let err = negotiate(&FailingServer, &out, &negotiation, &mut want_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Server(_)));
    }
}
