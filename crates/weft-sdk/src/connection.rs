//! Backends and the connection protocol.
//!
//! A [`Backend`] bundles a primitive store root with the [`SyncConnection`]
//! that keeps it in step with other replicas. It is handed to a
//! [`Session`](crate::Session) explicitly, so which backend is in use is
//! decided by whoever builds the session.

use crate::error::{Result, SdkError};
use crate::network::{MemoryNetwork, MemoryTransport, NetworkTransport, PeerId};
use crate::presence::{Awareness, UserState};
use crate::sync::{SyncConfig, SyncManager};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use weft_store::{NoopRoot, ReplicatedDoc, RootHandle};

/// Phase of a connect or disconnect, reported through the progress callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Syncing,
    Complete,
    Error,
}

/// Progress callback: phase plus a human-readable detail.
pub type Progress<'a> = &'a (dyn Fn(ConnectionStatus, &str) + Send + Sync);

/// Connects a store to its peers.
#[async_trait]
pub trait SyncConnection: Send + Sync {
    /// Join `url` as `user`. Fails with `ConnectionFailed` after reporting
    /// [`ConnectionStatus::Error`].
    async fn connect(&self, url: &str, user: UserState, progress: Progress<'_>) -> Result<()>;

    async fn disconnect(&self, progress: Progress<'_>) -> Result<()>;

    /// Apply whatever arrived from peers. Returns the number of messages
    /// handled.
    async fn pump(&self) -> Result<usize>;

    /// Handle traffic for `duration`.
    async fn pump_for(&self, duration: Duration) -> Result<usize>;

    /// Send local changes. Returns the number of updates sent.
    async fn flush(&self) -> Result<usize>;

    fn is_connected(&self) -> bool;

    fn awareness(&self) -> Arc<Awareness>;
}

/// Which kind of backend a client builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Noop,
    Replicated,
}

/// A store root and the connection that syncs it.
#[derive(Clone)]
pub struct Backend {
    kind: BackendKind,
    root: RootHandle,
    connection: Arc<dyn SyncConnection>,
}

impl Backend {
    /// Single-user, in-memory. Connecting always succeeds immediately.
    pub fn noop() -> Self {
        Self {
            kind: BackendKind::Noop,
            root: Arc::new(NoopRoot::new()),
            connection: Arc::new(NoopConnection::new("local")),
        }
    }

    /// A replica named `replica` on `network`.
    pub fn replicated_on(
        replica: impl Into<String>,
        network: MemoryNetwork,
        config: SyncConfig,
    ) -> Self {
        let doc = ReplicatedDoc::new(replica.into());
        Self {
            kind: BackendKind::Replicated,
            root: doc.handle(),
            connection: Arc::new(ReplicatedConnection::new(doc, network, config)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn root(&self) -> RootHandle {
        self.root.clone()
    }

    pub fn connection(&self) -> Arc<dyn SyncConnection> {
        self.connection.clone()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("kind", &self.kind).finish()
    }
}

/// Connection of the noop backend.
pub struct NoopConnection {
    awareness: Arc<Awareness>,
}

impl NoopConnection {
    pub fn new(user_id: &str) -> Self {
        Self {
            awareness: Arc::new(Awareness::new(UserState::new(user_id, user_id, "#888888"))),
        }
    }
}

#[async_trait]
impl SyncConnection for NoopConnection {
    async fn connect(&self, _url: &str, user: UserState, progress: Progress<'_>) -> Result<()> {
        self.awareness.update_user(user);
        progress(ConnectionStatus::Complete, "offline");
        Ok(())
    }

    async fn disconnect(&self, progress: Progress<'_>) -> Result<()> {
        progress(ConnectionStatus::Complete, "offline");
        Ok(())
    }

    async fn pump(&self) -> Result<usize> {
        Ok(0)
    }

    async fn pump_for(&self, _duration: Duration) -> Result<usize> {
        Ok(0)
    }

    async fn flush(&self) -> Result<usize> {
        Ok(0)
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn awareness(&self) -> Arc<Awareness> {
        self.awareness.clone()
    }
}

struct Joined {
    url: String,
    manager: SyncManager<MemoryTransport>,
}

/// Connection of the replicated backend: joins a room of the in-memory
/// network and runs a [`SyncManager`] for the document.
pub struct ReplicatedConnection {
    doc: ReplicatedDoc,
    network: MemoryNetwork,
    config: SyncConfig,
    awareness: Arc<Awareness>,
    joined: AsyncMutex<Option<Joined>>,
    connected: AtomicBool,
}

impl ReplicatedConnection {
    pub fn new(doc: ReplicatedDoc, network: MemoryNetwork, config: SyncConfig) -> Self {
        let replica = doc.replica_id().to_string();
        Self {
            awareness: Arc::new(Awareness::new(UserState::new(&replica, &replica, "#888888"))),
            doc,
            network,
            config,
            joined: AsyncMutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn doc(&self) -> &ReplicatedDoc {
        &self.doc
    }

    fn failed(progress: Progress<'_>, err: SdkError) -> SdkError {
        let detail = err.to_string();
        warn!(error = %detail, "Connection failed");
        progress(ConnectionStatus::Error, &detail);
        SdkError::ConnectionFailed(detail)
    }
}

#[async_trait]
impl SyncConnection for ReplicatedConnection {
    async fn connect(&self, url: &str, user: UserState, progress: Progress<'_>) -> Result<()> {
        let mut joined = self.joined.lock().await;
        if let Some(current) = joined.as_ref() {
            let detail = format!("already connected to {}", current.url);
            progress(ConnectionStatus::Error, &detail);
            return Err(SdkError::ConnectionFailed(detail));
        }

        progress(ConnectionStatus::Connecting, url);
        info!(url, replica = %self.doc.replica_id(), "Connecting");
        let peer_id = PeerId::new(self.doc.replica_id());
        let transport = self
            .network
            .join(url, peer_id.clone())
            .map_err(|e| Self::failed(progress, SdkError::NetworkError(e.to_string())))?;
        let peers: Vec<PeerId> = transport
            .connected_peers()
            .await
            .into_iter()
            .map(|p| p.id)
            .collect();

        let abort = |err: SdkError| {
            self.network.leave(url, &peer_id);
            Self::failed(progress, err)
        };

        self.awareness.update_user(user.clone());
        let mut manager = SyncManager::new(transport, self.doc.clone(), self.config.clone())
            .with_awareness(self.awareness.clone());

        progress(
            ConnectionStatus::Syncing,
            &format!("{} peer(s) in {}", peers.len(), url),
        );
        manager
            .hello(&user.name)
            .await
            .map_err(&abort)?;
        let missing = manager
            .await_sync(peers)
            .await
            .map_err(&abort)?;
        if !missing.is_empty() {
            warn!(?missing, "Peers did not answer the initial sync; continuing");
        }
        manager.flush().await.map_err(&abort)?;

        *joined = Some(Joined {
            url: url.to_string(),
            manager,
        });
        self.connected.store(true, Ordering::SeqCst);
        info!(url, "Connected");
        progress(ConnectionStatus::Complete, url);
        Ok(())
    }

    async fn disconnect(&self, progress: Progress<'_>) -> Result<()> {
        let Some(current) = self.joined.lock().await.take() else {
            progress(ConnectionStatus::Complete, "not connected");
            return Ok(());
        };
        self.connected.store(false, Ordering::SeqCst);
        progress(ConnectionStatus::Connecting, &current.url);
        // Best effort: the room is left either way
        if let Err(err) = current.manager.flush().await {
            warn!(error = %err, "Could not flush before leaving");
        }
        if let Err(err) = current.manager.goodbye().await {
            warn!(error = %err, "Could not say goodbye");
        }
        self.network
            .leave(&current.url, &PeerId::new(self.doc.replica_id()));
        info!(url = %current.url, "Disconnected");
        progress(ConnectionStatus::Complete, &current.url);
        Ok(())
    }

    async fn pump(&self) -> Result<usize> {
        match self.joined.lock().await.as_mut() {
            Some(current) => current.manager.pump().await,
            None => Ok(0),
        }
    }

    async fn pump_for(&self, duration: Duration) -> Result<usize> {
        match self.joined.lock().await.as_mut() {
            Some(current) => current.manager.pump_for(duration).await,
            None => Ok(0),
        }
    }

    async fn flush(&self) -> Result<usize> {
        match self.joined.lock().await.as_ref() {
            Some(current) => current.manager.flush().await,
            None => Ok(0),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn awareness(&self) -> Arc<Awareness> {
        self.awareness.clone()
    }
}
