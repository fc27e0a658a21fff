//! Per-peer session: the subscription tables for one remote peer.
//!
//! Client entries track what we requested from the peer, server entries what
//! the peer requested from us. Both tables are keyed by [`StreamId`] and
//! guarded by std mutexes that are never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use chunkstream_core::{split_hashes, Priority, Range, StreamId, TakeoverProof};

use crate::client::{complete_batch, prepare_batch, Client, PendingBatch};
use crate::error::SyncError;
use crate::messages::{
    OfferedHashesMsg, PeerId, StreamMessage, SubscribeErrorMsg, SubscribeMsg, TakeoverProofMsg,
    UnsubscribeMsg, WantedHashesMsg,
};
use crate::queue::Outbox;
use crate::registry::Registry;
use crate::server::{negotiate, Negotiation, NegotiationEnd, Server};
use crate::streamer::{StreamEvent, StreamerConfig};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum ClientState {
    /// Subscribe sent, no offer seen yet.
    Pending,
    Active(Arc<dyn Client>),
}

struct ClientEntry {
    state: ClientState,
    priority: Priority,
    batches: Vec<JoinHandle<()>>,
    /// Live stream whose Subscribe created this historical entry.
    paired_with: Option<StreamId>,
}

impl ClientEntry {
    fn pending(priority: Priority, paired_with: Option<StreamId>) -> Self {
        Self {
            state: ClientState::Pending,
            priority,
            batches: Vec::new(),
            paired_with,
        }
    }

    fn teardown(self) {
        for batch in &self.batches {
            batch.abort();
        }
        if let ClientState::Active(client) = self.state {
            client.close();
        }
    }
}

struct ServerEntry {
    server: Arc<dyn Server>,
    wants: mpsc::UnboundedSender<WantedHashesMsg>,
    task: JoinHandle<()>,
    paired_with: Option<StreamId>,
}

impl ServerEntry {
    fn teardown(self) {
        self.task.abort();
        self.server.close();
    }
}

/// Inbound work that awaits a client or server callback.
enum Inbound {
    Offered(OfferedHashesMsg),
    Takeover(TakeoverProofMsg),
}

/// Ordered worker for one stream's inbound work.
struct Lane {
    work: mpsc::UnboundedSender<Inbound>,
    task: JoinHandle<()>,
}

/// Whether `entry_pair` marks an entry created alongside `stream`.
fn paired(entry_pair: &Option<StreamId>, stream: &StreamId) -> bool {
    entry_pair.as_ref() == Some(stream)
}

/// Session state for one connected peer.
pub struct Peer {
    id: PeerId,
    outbox: Outbox,
    registry: Arc<Registry>,
    config: StreamerConfig,
    events: broadcast::Sender<StreamEvent>,
    clients: Mutex<HashMap<StreamId, ClientEntry>>,
    servers: Mutex<HashMap<StreamId, ServerEntry>>,
    lanes: Mutex<HashMap<StreamId, Lane>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    pub(crate) fn new(
        id: PeerId,
        outbox: Outbox,
        writer: JoinHandle<()>,
        registry: Arc<Registry>,
        config: StreamerConfig,
        events: broadcast::Sender<StreamEvent>,
    ) -> Self {
        Self {
            id,
            outbox,
            registry,
            config,
            events,
            clients: Mutex::new(HashMap::new()),
            servers: Mutex::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
            writer: Mutex::new(Some(writer)),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Whether a client entry (pending or active) exists for `stream`.
    pub fn has_client(&self, stream: &StreamId) -> bool {
        lock(&self.clients).contains_key(stream)
    }

    /// Whether the client for `stream` has seen its first offer.
    pub fn client_is_active(&self, stream: &StreamId) -> bool {
        matches!(
            lock(&self.clients).get(stream),
            Some(ClientEntry {
                state: ClientState::Active(_),
                ..
            })
        )
    }

    pub fn has_server(&self, stream: &StreamId) -> bool {
        lock(&self.servers).contains_key(stream)
    }

    pub fn client_streams(&self) -> Vec<StreamId> {
        lock(&self.clients).keys().cloned().collect()
    }

    pub fn server_streams(&self) -> Vec<StreamId> {
        lock(&self.servers).keys().cloned().collect()
    }

    fn publish(&self, event: StreamEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn send_top(&self, message: StreamMessage) {
        if !self.outbox.send(Priority::Top, message) {
            tracing::debug!(peer = %self.id, "writer gone, dropping message");
        }
    }

    /// Record pending client entries and request the stream.
    ///
    /// The caller has already checked that a client factory exists.
    pub(crate) fn subscribe(
        &self,
        stream: StreamId,
        history: Option<Range>,
        priority: Priority,
    ) -> Result<(), SyncError> {
        {
            let mut clients = lock(&self.clients);
            if let Some(ClientEntry {
                state: ClientState::Active(_),
                ..
            }) = clients.get(&stream)
            {
                return Err(SyncError::AlreadySubscribed(stream));
            }
            if let Some(old) = clients.insert(stream.clone(), ClientEntry::pending(priority, None)) {
                old.teardown();
            }

            // A historical subscription made on its own is left alone.
            if stream.is_live() && history.is_some() {
                clients
                    .entry(stream.history())
                    .or_insert_with(|| ClientEntry::pending(priority, Some(stream.clone())));
            }
        }

        tracing::debug!(peer = %self.id, stream = %stream, ?history, ?priority, "subscribing");
        let sent = self.outbox.send(
            priority,
            SubscribeMsg {
                stream,
                history,
                priority,
            }
            .into(),
        );
        if !sent {
            tracing::debug!(peer = %self.id, "writer gone, dropping subscribe");
        }
        Ok(())
    }

    /// Drop every entry for `stream`, plus the historical entries its own
    /// Subscribe created. Returns whether anything was removed.
    fn remove_entries(&self, stream: &StreamId) -> bool {
        let past = stream.history();

        let clients: Vec<ClientEntry> = {
            let mut table = lock(&self.clients);
            let mut removed: Vec<ClientEntry> = table.remove(stream).into_iter().collect();
            if stream.is_live() && table.get(&past).is_some_and(|e| paired(&e.paired_with, stream)) {
                removed.extend(table.remove(&past));
            }
            removed
        };
        let servers: Vec<ServerEntry> = {
            let mut table = lock(&self.servers);
            let mut removed: Vec<ServerEntry> = table.remove(stream).into_iter().collect();
            if stream.is_live() && table.get(&past).is_some_and(|e| paired(&e.paired_with, stream)) {
                removed.extend(table.remove(&past));
            }
            removed
        };

        let removed = !clients.is_empty() || !servers.is_empty();
        if removed {
            self.drop_lanes(stream, &past);
        }
        clients.into_iter().for_each(ClientEntry::teardown);
        servers.into_iter().for_each(ServerEntry::teardown);
        removed
    }

    /// Stop the lanes of keys that no longer have any entry.
    fn drop_lanes(&self, stream: &StreamId, past: &StreamId) {
        let idle: Vec<StreamId> = [stream, past]
            .into_iter()
            .filter(|key| !self.has_client(key) && !self.has_server(key))
            .cloned()
            .collect();
        let mut lanes = lock(&self.lanes);
        for key in idle {
            if let Some(lane) = lanes.remove(&key) {
                lane.task.abort();
            }
        }
    }

    /// Queue `work` behind earlier work for `stream`, off the receive path.
    fn dispatch(self: &Arc<Self>, stream: &StreamId, work: Inbound) {
        let mut lanes = lock(&self.lanes);
        let lane = lanes
            .entry(stream.clone())
            .or_insert_with(|| self.spawn_lane(stream));
        if lane.work.send(work).is_err() {
            tracing::debug!(peer = %self.id, stream = %stream, "lane stopped, dropping message");
        }
    }

    fn spawn_lane(self: &Arc<Self>, stream: &StreamId) -> Lane {
        let (work, mut queue) = mpsc::unbounded_channel();
        let weak: Weak<Peer> = Arc::downgrade(self);
        tracing::trace!(peer = %self.id, stream = %stream, "lane started");
        let task = tokio::spawn(async move {
            while let Some(next) = queue.recv().await {
                let Some(peer) = weak.upgrade() else {
                    return;
                };
                match next {
                    Inbound::Offered(msg) => peer.process_offer(msg).await,
                    Inbound::Takeover(msg) => peer.process_takeover(msg).await,
                }
            }
        });
        Lane { work, task }
    }

    /// Tear down `stream` locally and tell the peer. No-op when nothing exists.
    pub(crate) fn unsubscribe(&self, stream: &StreamId) -> bool {
        if !self.remove_entries(stream) {
            return false;
        }
        tracing::debug!(peer = %self.id, stream = %stream, "unsubscribing");
        self.send_top(
            UnsubscribeMsg {
                stream: stream.clone(),
            }
            .into(),
        );
        true
    }

    pub(crate) fn handle_unsubscribe(&self, msg: UnsubscribeMsg) {
        if self.remove_entries(&msg.stream) {
            tracing::debug!(peer = %self.id, stream = %msg.stream, "peer unsubscribed");
        } else {
            tracing::debug!(peer = %self.id, stream = %msg.stream, "unsubscribe for unknown stream");
        }
    }

    pub(crate) fn handle_subscribe(self: &Arc<Self>, msg: SubscribeMsg) {
        let SubscribeMsg {
            stream,
            history,
            priority,
        } = msg;

        if self.has_server(&stream) {
            tracing::debug!(peer = %self.id, stream = %stream, "duplicate subscribe discarded");
            return;
        }

        let live_history = if stream.is_live() { None } else { history };
        if !self.start_server(stream.clone(), live_history, priority, None) {
            return;
        }

        if let (true, Some(range)) = (stream.is_live(), history) {
            let past = stream.history();
            if !self.has_server(&past) {
                self.start_server(past, Some(range), priority, Some(stream));
            }
        }
    }

    /// Instantiate a server and spawn its negotiator. Refuses the
    /// subscription on factory failure.
    fn start_server(
        self: &Arc<Self>,
        stream: StreamId,
        history: Option<Range>,
        priority: Priority,
        paired_with: Option<StreamId>,
    ) -> bool {
        let server = match self.registry.new_server(&self.id, &stream) {
            Ok(server) => server,
            Err(e) => {
                tracing::warn!(peer = %self.id, stream = %stream, error = %e, "refusing subscription");
                self.send_top(
                    SubscribeErrorMsg {
                        error: e.to_string(),
                    }
                    .into(),
                );
                return false;
            }
        };

        let (wants_tx, mut wants_rx) = mpsc::unbounded_channel();
        let negotiation = Negotiation {
            stream: stream.clone(),
            history,
            priority,
            deliver_chunks: self.config.deliver_chunks,
        };

        let mut servers = lock(&self.servers);
        if servers.contains_key(&stream) {
            server.close();
            return false;
        }

        tracing::debug!(peer = %self.id, stream = %stream, ?history, "serving stream");
        let weak: Weak<Peer> = Arc::downgrade(self);
        let outbox = self.outbox.clone();
        let task_server = Arc::clone(&server);
        let task = tokio::spawn(async move {
            let end = negotiate(task_server.as_ref(), &outbox, &negotiation, &mut wants_rx).await;
            let Some(peer) = weak.upgrade() else {
                return;
            };
            match end {
                Ok(NegotiationEnd::Stopped) => {}
                Ok(NegotiationEnd::HistoryServed) => peer.history_served(&negotiation.stream),
                Err(e) => peer.fail_server(&negotiation.stream, e),
            }
        });

        servers.insert(
            stream,
            ServerEntry {
                server,
                wants: wants_tx,
                task,
                paired_with,
            },
        );
        true
    }

    pub(crate) fn handle_wanted(&self, msg: WantedHashesMsg) {
        let servers = lock(&self.servers);
        match servers.get(&msg.stream) {
            Some(entry) => {
                let stream = msg.stream.clone();
                if entry.wants.send(msg).is_err() {
                    tracing::debug!(peer = %self.id, stream = %stream, "negotiation already ended");
                }
            }
            None => {
                tracing::debug!(peer = %self.id, stream = %msg.stream, "want for unknown stream");
            }
        }
    }

    pub(crate) fn handle_takeover(self: &Arc<Self>, msg: TakeoverProofMsg) {
        if !self.has_server(&msg.stream) {
            tracing::debug!(peer = %self.id, stream = %msg.stream, "takeover for unknown stream");
            return;
        }
        let stream = msg.stream.clone();
        self.dispatch(&stream, Inbound::Takeover(msg));
    }

    async fn process_takeover(&self, msg: TakeoverProofMsg) {
        let server = lock(&self.servers)
            .get(&msg.stream)
            .map(|entry| Arc::clone(&entry.server));
        let Some(server) = server else {
            tracing::debug!(peer = %self.id, stream = %msg.stream, "takeover for unknown stream");
            return;
        };
        if let Err(e) = server.take_over(msg.proof).await {
            tracing::warn!(peer = %self.id, stream = %msg.stream, error = %e, "takeover rejected");
        }
    }

    pub(crate) fn handle_offered(self: &Arc<Self>, msg: OfferedHashesMsg) {
        if !self.has_client(&msg.stream) {
            tracing::debug!(peer = %self.id, stream = %msg.stream, "offer for unknown stream");
            return;
        }
        let stream = msg.stream.clone();
        self.dispatch(&stream, Inbound::Offered(msg));
    }

    async fn process_offer(self: &Arc<Self>, msg: OfferedHashesMsg) {
        let OfferedHashesMsg {
            stream,
            from,
            to,
            hashes,
            handover_proof,
        } = msg;

        let hashes = match split_hashes(&hashes) {
            Ok(hashes) => hashes,
            Err(e) => {
                tracing::warn!(peer = %self.id, stream = %stream, error = %e, "malformed offer");
                return;
            }
        };
        if hashes.len() > self.config.max_hashes_per_offer {
            tracing::warn!(
                peer = %self.id,
                stream = %stream,
                count = hashes.len(),
                "offer exceeds hash limit"
            );
            return;
        }

        let activated = {
            let mut clients = lock(&self.clients);
            let Some(entry) = clients.get_mut(&stream) else {
                tracing::debug!(peer = %self.id, stream = %stream, "offer for unknown stream");
                return;
            };
            match &entry.state {
                ClientState::Active(client) => Ok((Arc::clone(client), entry.priority)),
                ClientState::Pending => match self.registry.new_client(&self.id, &stream) {
                    Ok(client) => {
                        entry.state = ClientState::Active(Arc::clone(&client));
                        Ok((client, entry.priority))
                    }
                    Err(e) => Err(e),
                },
            }
        };
        let (client, priority) = match activated {
            Ok(active) => active,
            Err(e) => return self.fail_client(&stream, e),
        };

        tracing::debug!(peer = %self.id, stream = %stream, from, to, count = hashes.len(), "offer received");
        let prepared = match prepare_batch(client.as_ref(), &hashes).await {
            Ok(prepared) => prepared,
            Err(e) => return self.fail_client(&stream, e),
        };

        let batch = PendingBatch {
            stream: stream.clone(),
            until: to,
            last_hash: hashes.last().copied(),
            handover: handover_proof,
            fetches: prepared.fetches,
        };

        let mut clients = lock(&self.clients);
        let Some(entry) = clients.get_mut(&stream) else {
            tracing::debug!(peer = %self.id, stream = %stream, "torn down during offer, no reply");
            return;
        };
        entry.batches.retain(|task| !task.is_finished());

        self.outbox.send(
            priority,
            WantedHashesMsg {
                stream: stream.clone(),
                want: prepared.mask.to_bytes(),
                from: to,
                to: 0,
            }
            .into(),
        );

        let weak: Weak<Peer> = Arc::downgrade(self);
        entry.batches.push(tokio::spawn(async move {
            let outcome = complete_batch(client, batch).await;
            let Some(peer) = weak.upgrade() else {
                return;
            };
            match outcome {
                Ok(proof) => peer.batch_completed(&stream, priority, to, proof),
                Err(e) => peer.fail_client(&stream, e),
            }
        }));
    }

    fn batch_completed(
        &self,
        stream: &StreamId,
        priority: Priority,
        until: u64,
        proof: Option<TakeoverProof>,
    ) {
        if let Some(proof) = proof {
            self.outbox.send(
                priority,
                TakeoverProofMsg {
                    stream: stream.clone(),
                    proof,
                }
                .into(),
            );
        }
        tracing::debug!(peer = %self.id, stream = %stream, until, "batch completed");
        self.publish(StreamEvent::BatchCompleted {
            peer: self.id,
            stream: stream.clone(),
            until,
        });
    }

    fn history_served(&self, stream: &StreamId) {
        tracing::debug!(peer = %self.id, stream = %stream, "history served");
        self.publish(StreamEvent::HistoryServed {
            peer: self.id,
            stream: stream.clone(),
        });
    }

    fn fail_client(&self, stream: &StreamId, error: SyncError) {
        let Some(entry) = lock(&self.clients).remove(stream) else {
            return;
        };
        entry.teardown();
        self.subscription_failed(stream, error);
    }

    fn fail_server(&self, stream: &StreamId, error: SyncError) {
        let Some(entry) = lock(&self.servers).remove(stream) else {
            return;
        };
        entry.server.close();
        self.subscription_failed(stream, error);
    }

    fn subscription_failed(&self, stream: &StreamId, error: SyncError) {
        tracing::warn!(peer = %self.id, stream = %stream, error = %error, "subscription failed");
        self.publish(StreamEvent::SubscriptionFailed {
            peer: self.id,
            stream: stream.clone(),
            error: error.to_string(),
        });
        self.send_top(
            UnsubscribeMsg {
                stream: stream.clone(),
            }
            .into(),
        );
    }

    pub(crate) fn handle_refusal(&self, msg: SubscribeErrorMsg) {
        tracing::warn!(peer = %self.id, error = %msg.error, "subscription refused");
        self.publish(StreamEvent::SubscribeRefused {
            peer: self.id,
            error: msg.error,
        });
    }

    /// Tear down every entry and stop the writer.
    pub(crate) fn close(&self) {
        let clients: Vec<ClientEntry> = lock(&self.clients).drain().map(|(_, e)| e).collect();
        let servers: Vec<ServerEntry> = lock(&self.servers).drain().map(|(_, e)| e).collect();
        for (_, lane) in lock(&self.lanes).drain() {
            lane.task.abort();
        }
        clients.into_iter().for_each(ClientEntry::teardown);
        servers.into_iter().for_each(ServerEntry::teardown);

        if let Some(writer) = lock(&self.writer).take() {
            writer.abort();
        }
        tracing::debug!(peer = %self.id, "peer closed");
    }
}
