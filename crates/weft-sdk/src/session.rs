//! Session management for collaborative editing sessions.

use crate::client::ClientConfig;
use crate::connection::{Backend, BackendKind, ConnectionStatus};
use crate::error::Result;
use crate::presence::{Awareness, UserState};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use ulid::Ulid;
use weft_store::RootHandle;

/// Events emitted by a session.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A connect or disconnect moved to a new phase.
    Status {
        status: ConnectionStatus,
        details: String,
    },
    /// Session connected.
    Connected { url: String },
    /// Session disconnected.
    Disconnected,
}

/// One user's view of one collaborative document.
///
/// The session owns the store root of its [`Backend`]; domain objects are
/// built on [`Session::root`]. Remote changes reach the root only while the
/// caller drives [`Session::pump`].
pub struct Session {
    session_id: String,
    config: ClientConfig,
    backend: Backend,
    status: Arc<RwLock<Option<ConnectionStatus>>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a session with a fresh id.
    pub fn new(config: ClientConfig, backend: Backend) -> Self {
        Self::with_id(Ulid::new().to_string(), config, backend)
    }

    pub fn with_id(session_id: impl Into<String>, config: ClientConfig, backend: Backend) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            session_id: session_id.into(),
            config,
            backend,
            status: Arc::new(RwLock::new(None)),
            event_tx,
        }
    }

    /// Get the session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the user name.
    pub fn user_name(&self) -> &str {
        &self.config.user_name
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The document root all bindings of this session live on.
    pub fn root(&self) -> RootHandle {
        self.backend.root()
    }

    /// Get the awareness manager.
    pub fn awareness(&self) -> Arc<Awareness> {
        self.backend.connection().awareness()
    }

    /// The local user as announced to peers.
    pub fn user_state(&self) -> UserState {
        UserState::new(
            self.session_id.clone(),
            self.config.user_name.clone(),
            self.config.color.clone(),
        )
    }

    /// Last phase reported by a connect or disconnect.
    pub fn status(&self) -> Option<ConnectionStatus> {
        *self.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.connection().is_connected()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn observe<'a, F>(&'a self, progress: &'a F) -> impl Fn(ConnectionStatus, &str) + Send + Sync + 'a
    where
        F: Fn(ConnectionStatus, &str) + Send + Sync,
    {
        move |status: ConnectionStatus, details: &str| {
            *self.status.write() = Some(status);
            let _ = self.event_tx.send(SessionEvent::Status {
                status,
                details: details.to_string(),
            });
            progress(status, details);
        }
    }

    /// Connect to the document at `url`, reporting each phase to `progress`.
    pub async fn connect<F>(&self, url: &str, progress: F) -> Result<()>
    where
        F: Fn(ConnectionStatus, &str) + Send + Sync,
    {
        let observed = self.observe(&progress);
        self.backend
            .connection()
            .connect(url, self.user_state(), &observed)
            .await?;
        let _ = self.event_tx.send(SessionEvent::Connected {
            url: url.to_string(),
        });
        Ok(())
    }

    /// Disconnect from the session.
    pub async fn disconnect<F>(&self, progress: F) -> Result<()>
    where
        F: Fn(ConnectionStatus, &str) + Send + Sync,
    {
        let observed = self.observe(&progress);
        self.backend.connection().disconnect(&observed).await?;
        let _ = self.event_tx.send(SessionEvent::Disconnected);
        Ok(())
    }

    /// Apply whatever arrived from peers.
    pub async fn pump(&self) -> Result<usize> {
        self.backend.connection().pump().await
    }

    /// Handle traffic for `duration`.
    pub async fn pump_for(&self, duration: Duration) -> Result<usize> {
        self.backend.connection().pump_for(duration).await
    }

    /// Send local changes and awareness to peers.
    pub async fn flush(&self) -> Result<usize> {
        self.backend.connection().flush().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("user_name", &self.config.user_name)
            .field("backend", &self.backend)
            .finish()
    }
}
