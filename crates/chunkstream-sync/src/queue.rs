//! Per-peer outgoing queues, one per priority level.
//!
//! Enqueueing never blocks. A single writer task per peer drains the queues
//! highest priority first, so order is kept within a level but not across
//! levels.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chunkstream_core::{Priority, PRIORITY_LEVELS};

use crate::messages::{PeerId, StreamMessage};
use crate::transport::Transport;

/// Sending half of a peer's priority queues.
#[derive(Clone)]
pub(crate) struct Outbox {
    queues: [mpsc::UnboundedSender<StreamMessage>; PRIORITY_LEVELS],
}

impl Outbox {
    /// Enqueue `message` on the `priority` queue.
    ///
    /// Returns false once the writer has stopped.
    pub fn send(&self, priority: Priority, message: StreamMessage) -> bool {
        self.queues[priority.index()].send(message).is_ok()
    }
}

/// Receiving half of a peer's priority queues.
pub(crate) struct PriorityQueues {
    pub low: mpsc::UnboundedReceiver<StreamMessage>,
    pub mid: mpsc::UnboundedReceiver<StreamMessage>,
    pub high: mpsc::UnboundedReceiver<StreamMessage>,
    pub top: mpsc::UnboundedReceiver<StreamMessage>,
}

/// Create a fresh set of queues.
pub(crate) fn outbox() -> (Outbox, PriorityQueues) {
    let (low_tx, low) = mpsc::unbounded_channel();
    let (mid_tx, mid) = mpsc::unbounded_channel();
    let (high_tx, high) = mpsc::unbounded_channel();
    let (top_tx, top) = mpsc::unbounded_channel();
    (
        Outbox {
            queues: [low_tx, mid_tx, high_tx, top_tx],
        },
        PriorityQueues { low, mid, high, top },
    )
}

/// Drain `queues` into `transport` until every sender is gone.
pub(crate) fn spawn_writer<T>(
    peer: PeerId,
    mut queues: PriorityQueues,
    transport: Arc<T>,
) -> JoinHandle<()>
where
    T: Transport + ?Sized + 'static,
{
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;

                Some(m) = queues.top.recv() => m,
                Some(m) = queues.high.recv() => m,
                Some(m) = queues.mid.recv() => m,
                Some(m) = queues.low.recv() => m,
                else => break,
            };

            let code = message.code();
            if let Err(e) = transport.send(&peer, message).await {
                tracing::warn!(peer = %peer, code, error = %e, "failed to send message");
            }
        }
        tracing::debug!(peer = %peer, "writer stopped");
    })
}
