//! Synchronization of a replicated document over a transport.
//!
//! The manager never applies anything in the background. Local updates are
//! queued as they commit and sent by [`SyncManager::flush`]; incoming
//! messages are applied by [`SyncManager::pump`] on the caller's task, so
//! remote-change listeners always run there.

use crate::error::{Result, SdkError};
use crate::network::{Message, NetworkTransport, PeerId};
use crate::presence::Awareness;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use weft_store::{ReplicatedDoc, Subscription};

/// Configuration for sync behavior.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Maximum number of updates sent in one flush.
    pub max_batch_size: usize,
    /// Flush queued updates at the end of every pump.
    pub auto_flush: bool,
    /// How often a long-running loop should broadcast awareness (in
    /// milliseconds).
    pub awareness_interval_ms: u64,
    /// How long connecting waits for sync responses (in milliseconds).
    pub sync_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            auto_flush: true,
            awareness_interval_ms: 500,
            sync_timeout_ms: 2000,
        }
    }
}

/// Builder for sync configuration.
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size.max(1);
        self
    }

    pub fn auto_flush(mut self, enabled: bool) -> Self {
        self.config.auto_flush = enabled;
        self
    }

    pub fn awareness_interval(mut self, ms: u64) -> Self {
        self.config.awareness_interval_ms = ms;
        self
    }

    pub fn sync_timeout(mut self, ms: u64) -> Self {
        self.config.sync_timeout_ms = ms;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by the sync manager.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// A peer introduced itself.
    PeerJoined { peer_id: PeerId, user_name: String },
    /// A peer said goodbye.
    PeerLeft(PeerId),
    /// A sync response from a peer was applied.
    SyncCompleted { peer_id: PeerId, applied: usize },
    /// Received an incremental update from a peer.
    ReceivedUpdate { peer_id: PeerId },
    /// Local updates were sent.
    SentUpdates { count: usize },
    /// Sync error occurred.
    SyncError { peer_id: PeerId, error: String },
}

/// Sync state for a peer.
#[derive(Clone, Debug, Default)]
pub struct PeerSyncState {
    /// User name announced in the peer's hello.
    pub user_name: Option<String>,
    /// Number of updates received from the peer.
    pub updates_received: usize,
    /// Last time anything arrived from the peer.
    pub last_seen: Option<Instant>,
}

/// Manages synchronization of one document between peers.
pub struct SyncManager<T: NetworkTransport> {
    transport: Arc<T>,
    doc: ReplicatedDoc,
    config: SyncConfig,
    awareness: Option<Arc<Awareness>>,
    inbox: Option<mpsc::Receiver<(PeerId, Message)>>,
    outbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    peer_states: HashMap<PeerId, PeerSyncState>,
    event_tx: broadcast::Sender<SyncEvent>,
    _updates: Subscription,
}

impl<T: NetworkTransport> SyncManager<T> {
    /// Create a new sync manager. Every update the document commits from now
    /// on is queued for [`flush`](Self::flush).
    pub fn new(transport: Arc<T>, doc: ReplicatedDoc, config: SyncConfig) -> Self {
        let outbox = Arc::new(Mutex::new(VecDeque::new()));
        let queue = outbox.clone();
        let updates = doc.on_update(move |update: &[u8]| queue.lock().push_back(update.to_vec()));
        let inbox = transport.subscribe();
        if inbox.is_none() {
            warn!("Transport inbox already taken; incoming messages will not be seen");
        }
        let (event_tx, _) = broadcast::channel(100);

        Self {
            transport,
            doc,
            config,
            awareness: None,
            inbox,
            outbox,
            peer_states: HashMap::new(),
            event_tx,
            _updates: updates,
        }
    }

    /// Share awareness through this manager.
    pub fn with_awareness(mut self, awareness: Arc<Awareness>) -> Self {
        self.awareness = Some(awareness);
        self
    }

    /// Get the sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn doc(&self) -> &ReplicatedDoc {
        &self.doc
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Subscribe to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Number of local updates waiting to be sent.
    pub fn pending(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Get sync state for a peer.
    pub fn get_peer_state(&self, peer_id: &PeerId) -> Option<&PeerSyncState> {
        self.peer_states.get(peer_id)
    }

    async fn broadcast(&self, message: Message) -> Result<()> {
        self.transport
            .broadcast(message)
            .await
            .map_err(|e| SdkError::NetworkError(e.to_string()))
    }

    async fn send(&self, peer_id: &PeerId, message: Message) -> Result<()> {
        self.transport
            .send(peer_id, message)
            .await
            .map_err(|e| SdkError::SyncError(e.to_string()))
    }

    fn request(&self) -> Message {
        Message::SyncRequest {
            state_vector: self.doc.state_vector(),
        }
    }

    /// Introduce ourselves to every peer and ask each for what we miss.
    pub async fn hello(&self, user_name: &str) -> Result<()> {
        self.broadcast(Message::Hello {
            replica_id: self.doc.replica_id().to_string(),
            user_name: user_name.to_string(),
        })
        .await?;
        self.broadcast(self.request()).await
    }

    /// Tell every peer we are leaving.
    pub async fn goodbye(&self) -> Result<()> {
        self.broadcast(Message::Bye).await
    }

    /// Send queued local updates, and the local awareness state if it
    /// changed. Returns how many updates went out.
    pub async fn flush(&self) -> Result<usize> {
        let mut sent = 0;
        loop {
            let batch: Vec<Vec<u8>> = {
                let mut outbox = self.outbox.lock();
                let take = outbox.len().min(self.config.max_batch_size.max(1));
                outbox.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }
            sent += batch.len();
            for update in batch {
                self.broadcast(Message::Update { update }).await?;
            }
        }

        if let Some(awareness) = &self.awareness {
            if awareness.take_dirty() {
                if let Some(state) = awareness.local_state() {
                    self.broadcast(Message::Awareness { state }).await?;
                }
            }
        }

        if sent > 0 {
            debug!(count = sent, "Flushed local updates");
            let _ = self.event_tx.send(SyncEvent::SentUpdates { count: sent });
        }
        Ok(sent)
    }

    /// Apply every message already waiting in the inbox. Returns how many
    /// were handled.
    pub async fn pump(&mut self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let next = match self.inbox.as_mut() {
                Some(inbox) => inbox.try_recv().ok(),
                None => None,
            };
            let Some((from, message)) = next else {
                break;
            };
            self.handle(from, message).await?;
            handled += 1;
        }
        if self.config.auto_flush {
            self.flush().await?;
        }
        Ok(handled)
    }

    /// Keep handling messages until `duration` has passed.
    pub async fn pump_for(&mut self, duration: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + duration;
        let mut handled = 0;
        loop {
            let received = match self.inbox.as_mut() {
                Some(inbox) => tokio::time::timeout_at(deadline, inbox.recv()).await,
                None => {
                    tokio::time::sleep_until(deadline).await;
                    return Ok(handled);
                }
            };
            match received {
                Ok(Some((from, message))) => {
                    self.handle(from, message).await?;
                    handled += 1;
                    if self.config.auto_flush {
                        self.flush().await?;
                    }
                }
                Ok(None) | Err(_) => return Ok(handled),
            }
        }
    }

    /// Wait until every peer in `peers` has answered a sync request, handling
    /// all other traffic meanwhile. Returns the peers that never answered.
    pub async fn await_sync(&mut self, peers: Vec<PeerId>) -> Result<Vec<PeerId>> {
        let mut waiting: HashSet<PeerId> = peers.into_iter().collect();
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.sync_timeout_ms);

        while !waiting.is_empty() {
            let received = match self.inbox.as_mut() {
                Some(inbox) => tokio::time::timeout_at(deadline, inbox.recv()).await,
                None => break,
            };
            match received {
                Ok(Some((from, message))) => {
                    if matches!(message, Message::SyncResponse { .. }) {
                        waiting.remove(&from);
                    }
                    self.handle(from, message).await?;
                }
                Ok(None) | Err(_) => break,
            }
        }

        let mut missing: Vec<PeerId> = waiting.into_iter().collect();
        missing.sort();
        Ok(missing)
    }

    fn touch(&mut self, peer_id: &PeerId) -> &mut PeerSyncState {
        let state = self.peer_states.entry(peer_id.clone()).or_default();
        state.last_seen = Some(Instant::now());
        state
    }

    async fn handle(&mut self, from: PeerId, message: Message) -> Result<()> {
        match message {
            Message::Hello {
                replica_id,
                user_name,
            } => {
                info!(peer = %from, replica = %replica_id, "Peer joined");
                self.touch(&from).user_name = Some(user_name.clone());
                let _ = self.event_tx.send(SyncEvent::PeerJoined {
                    peer_id: from.clone(),
                    user_name,
                });
                // The newcomer may hold updates we lack
                self.send(&from, self.request()).await?;
                if let Some(state) = self.awareness.as_ref().and_then(|a| a.local_state()) {
                    self.send(&from, Message::Awareness { state }).await?;
                }
            }
            Message::SyncRequest { state_vector } => {
                match self.doc.encode_diff(&state_vector) {
                    Ok(update) => {
                        debug!(peer = %from, bytes = update.len(), "Answering sync request");
                        self.send(&from, Message::SyncResponse { update }).await?;
                    }
                    Err(err) => self.report(&from, err.to_string()),
                }
            }
            Message::SyncResponse { update } => {
                let applied = match self.doc.apply_update(&update) {
                    Ok(true) => 1,
                    Ok(false) => 0,
                    Err(err) => {
                        self.report(&from, err.to_string());
                        0
                    }
                };
                self.touch(&from).updates_received += applied;
                debug!(peer = %from, applied, "Applied sync response");
                let _ = self.event_tx.send(SyncEvent::SyncCompleted {
                    peer_id: from,
                    applied,
                });
            }
            Message::Update { update } => match self.doc.apply_update(&update) {
                Ok(fresh) => {
                    if fresh {
                        self.touch(&from).updates_received += 1;
                    }
                    let _ = self
                        .event_tx
                        .send(SyncEvent::ReceivedUpdate { peer_id: from });
                }
                Err(err) => self.report(&from, err.to_string()),
            },
            Message::Awareness { state } => {
                self.touch(&from);
                if let Some(awareness) = &self.awareness {
                    awareness.apply_remote(state);
                }
            }
            Message::Bye => {
                info!(peer = %from, "Peer left");
                let user = self.peer_states.remove(&from);
                if let (Some(awareness), Some(_)) = (&self.awareness, user) {
                    awareness.remove(&from.0);
                }
                let _ = self.event_tx.send(SyncEvent::PeerLeft(from));
            }
            Message::Ping => self.send(&from, Message::Pong).await?,
            Message::Pong => {
                self.touch(&from);
            }
        }
        Ok(())
    }

    fn report(&self, peer_id: &PeerId, error: String) {
        warn!(peer = %peer_id, %error, "Dropping undecodable sync payload");
        let _ = self.event_tx.send(SyncEvent::SyncError {
            peer_id: peer_id.clone(),
            error,
        });
    }
}
