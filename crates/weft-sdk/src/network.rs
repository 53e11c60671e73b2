//! Network transport abstractions for document synchronization.

use crate::presence::AwarenessState;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of each peer's inbox.
const INBOX_CAPACITY: usize = 1024;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Peer connection state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Connected,
}

/// Information about a connected peer.
#[derive(Clone, Debug)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub state: PeerState,
}

/// Messages exchanged between peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// Hello/handshake message.
    Hello {
        replica_id: String,
        user_name: String,
    },
    /// Ask for everything missing from the encoded `state_vector`.
    SyncRequest { state_vector: Vec<u8> },
    /// One encoded update answering a sync request.
    SyncResponse { update: Vec<u8> },
    /// Incremental update.
    Update { update: Vec<u8> },
    /// Presence of one user.
    Awareness { state: AwarenessState },
    /// The sender is leaving.
    Bye,
    /// Ping for keepalive.
    Ping,
    /// Pong response.
    Pong,
}

/// Network error type.
#[derive(Clone, Debug)]
pub enum NetworkError {
    ConnectionFailed(String),
    PeerNotFound(String),
    SendFailed(String),
    Disconnected,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            NetworkError::PeerNotFound(id) => write!(f, "Peer not found: {}", id),
            NetworkError::SendFailed(e) => write!(f, "Send failed: {}", e),
            NetworkError::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Abstract network transport trait.
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    /// Connect to a peer.
    async fn connect(&self, peer_id: &PeerId) -> Result<(), NetworkError>;

    /// Disconnect from a peer.
    async fn disconnect(&self, peer_id: &PeerId) -> Result<(), NetworkError>;

    /// Send a message to a specific peer.
    async fn send(&self, peer_id: &PeerId, message: Message) -> Result<(), NetworkError>;

    /// Broadcast a message to all connected peers.
    async fn broadcast(&self, message: Message) -> Result<(), NetworkError>;

    /// Get list of connected peers.
    async fn connected_peers(&self) -> Vec<Peer>;

    /// Take the receiving end of the inbox. Only the first call gets it.
    fn subscribe(&self) -> Option<mpsc::Receiver<(PeerId, Message)>>;
}

/// Type alias for the message receiver shared across threads.
type SharedMessageReceiver = Arc<RwLock<Option<mpsc::Receiver<(PeerId, Message)>>>>;
/// Type alias for the outgoing message senders shared across threads.
type SharedOutgoing = Arc<RwLock<HashMap<PeerId, mpsc::Sender<(PeerId, Message)>>>>;

/// In-memory transport for testing and simulation.
pub struct MemoryTransport {
    local_id: PeerId,
    peers: Arc<RwLock<HashMap<PeerId, Peer>>>,
    message_tx: mpsc::Sender<(PeerId, Message)>,
    message_rx: SharedMessageReceiver,
    outgoing: SharedOutgoing,
}

impl MemoryTransport {
    pub fn new(local_id: PeerId) -> Self {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        Self {
            local_id,
            peers: Arc::new(RwLock::new(HashMap::new())),
            message_tx: tx,
            message_rx: Arc::new(RwLock::new(Some(rx))),
            outgoing: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    fn peer(id: &PeerId) -> Peer {
        Peer {
            id: id.clone(),
            name: id.0.clone(),
            state: PeerState::Connected,
        }
    }

    /// Connect two memory transports together.
    pub fn connect_to(&self, other: &MemoryTransport) {
        self.peers
            .write()
            .insert(other.local_id.clone(), Self::peer(&other.local_id));
        self.outgoing
            .write()
            .insert(other.local_id.clone(), other.message_tx.clone());

        other
            .peers
            .write()
            .insert(self.local_id.clone(), Self::peer(&self.local_id));
        other
            .outgoing
            .write()
            .insert(self.local_id.clone(), self.message_tx.clone());
    }

    /// Undo [`connect_to`](Self::connect_to) on both sides.
    pub fn disconnect_from(&self, other: &MemoryTransport) {
        self.peers.write().remove(&other.local_id);
        self.outgoing.write().remove(&other.local_id);
        other.peers.write().remove(&self.local_id);
        other.outgoing.write().remove(&self.local_id);
    }
}

#[async_trait]
impl NetworkTransport for MemoryTransport {
    async fn connect(&self, peer_id: &PeerId) -> Result<(), NetworkError> {
        if !self.outgoing.read().contains_key(peer_id) {
            return Err(NetworkError::PeerNotFound(peer_id.to_string()));
        }
        self.peers.write().insert(peer_id.clone(), Self::peer(peer_id));
        Ok(())
    }

    async fn disconnect(&self, peer_id: &PeerId) -> Result<(), NetworkError> {
        self.peers.write().remove(peer_id);
        self.outgoing.write().remove(peer_id);
        Ok(())
    }

    async fn send(&self, peer_id: &PeerId, message: Message) -> Result<(), NetworkError> {
        let tx = {
            let outgoing = self.outgoing.read();
            outgoing.get(peer_id).cloned()
        };

        if let Some(tx) = tx {
            tx.send((self.local_id.clone(), message))
                .await
                .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
            Ok(())
        } else {
            Err(NetworkError::PeerNotFound(peer_id.to_string()))
        }
    }

    async fn broadcast(&self, message: Message) -> Result<(), NetworkError> {
        let senders: Vec<_> = {
            let outgoing = self.outgoing.read();
            outgoing.values().cloned().collect()
        };

        let local_id = &self.local_id;
        let sends = senders
            .iter()
            .map(|tx| tx.send((local_id.clone(), message.clone())));
        // A peer that went away mid-broadcast is not an error for the others
        futures::future::join_all(sends).await;
        Ok(())
    }

    async fn connected_peers(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    fn subscribe(&self) -> Option<mpsc::Receiver<(PeerId, Message)>> {
        self.message_rx.write().take()
    }
}

/// In-process rooms of memory transports, keyed by URL.
///
/// Joining a room connects the newcomer to every transport already in it.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    rooms: Arc<RwLock<HashMap<String, Vec<Arc<MemoryTransport>>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the room at `url` as `peer_id`.
    pub fn join(&self, url: &str, peer_id: PeerId) -> Result<Arc<MemoryTransport>, NetworkError> {
        let mut rooms = self.rooms.write();
        let members = rooms.entry(url.to_string()).or_default();
        if members.iter().any(|m| m.local_id() == &peer_id) {
            return Err(NetworkError::ConnectionFailed(format!(
                "{} is already in {}",
                peer_id, url
            )));
        }

        let transport = Arc::new(MemoryTransport::new(peer_id));
        for member in members.iter() {
            transport.connect_to(member);
        }
        members.push(transport.clone());
        debug!(url, peer = %transport.local_id(), members = members.len(), "Joined room");
        Ok(transport)
    }

    /// Leave the room at `url`, disconnecting from everyone in it.
    pub fn leave(&self, url: &str, peer_id: &PeerId) {
        let mut rooms = self.rooms.write();
        let Some(members) = rooms.get_mut(url) else {
            return;
        };
        let Some(position) = members.iter().position(|m| m.local_id() == peer_id) else {
            return;
        };
        let leaving = members.remove(position);
        for member in members.iter() {
            leaving.disconnect_from(member);
        }
        if members.is_empty() {
            rooms.remove(url);
        }
    }

    /// Peers currently in the room at `url`.
    pub fn members(&self, url: &str) -> Vec<PeerId> {
        self.rooms
            .read()
            .get(url)
            .map(|m| m.iter().map(|t| t.local_id().clone()).collect())
            .unwrap_or_default()
    }
}

/// Create a network of connected memory transports for testing.
pub fn create_network(count: usize) -> Vec<MemoryTransport> {
    let transports: Vec<_> = (0..count)
        .map(|i| MemoryTransport::new(PeerId::new(format!("peer-{}", i))))
        .collect();

    for i in 0..count {
        for j in (i + 1)..count {
            transports[i].connect_to(&transports[j]);
        }
    }

    transports
}
