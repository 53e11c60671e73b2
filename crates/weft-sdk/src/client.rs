//! High-level client for the Weft SDK.

use crate::connection::{Backend, BackendKind};
use crate::network::MemoryNetwork;
use crate::session::Session;
use crate::sync::SyncConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use ulid::Ulid;

/// Configuration for the Weft client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// User name for presence.
    pub user_name: String,
    /// Color shown next to the user's cursor.
    pub color: String,
    /// Backend built for new sessions.
    pub backend: BackendKind,
    /// Sync behavior of replicated sessions.
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_name: "Anonymous".to_string(),
            color: "#0066cc".to_string(),
            backend: BackendKind::Noop,
            sync: SyncConfig::default(),
        }
    }
}

/// Builder for client configuration.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.config.user_name = name.into();
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.config.color = color.into();
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The main Weft client.
///
/// The client builds sessions with the backend its config names. Replicated
/// sessions of clients that share a [`MemoryNetwork`] can find each other by
/// URL.
///
/// # Example
///
/// ```rust
/// use weft_sdk::{BackendKind, Client, ClientConfigBuilder};
/// use weft_store::{CrdtRoot, MapExt};
///
/// let config = ClientConfigBuilder::new()
///     .user_name("Alice")
///     .backend(BackendKind::Noop)
///     .build();
/// let client = Client::new(config);
///
/// let session = client.create_session("board");
/// let meta = session.root().get_map("meta").unwrap();
/// meta.set_value("title", "Roadmap").unwrap();
/// ```
pub struct Client {
    config: ClientConfig,
    network: MemoryNetwork,
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl Client {
    /// Create a client on a network of its own. Only its sessions can reach
    /// each other; use [`Client::with_network`] to share one.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_network(config, MemoryNetwork::new())
    }

    pub fn with_network(config: ClientConfig, network: MemoryNetwork) -> Self {
        Self {
            config,
            network,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the user name.
    pub fn user_name(&self) -> &str {
        &self.config.user_name
    }

    /// A fresh backend of the configured kind.
    pub fn make_backend(&self) -> Backend {
        match self.config.backend {
            BackendKind::Noop => Backend::noop(),
            BackendKind::Replicated => {
                let replica = format!(
                    "{}-{}",
                    self.config.user_name.to_lowercase().replace(' ', "-"),
                    Ulid::new()
                );
                Backend::replicated_on(replica, self.network.clone(), self.config.sync.clone())
            }
        }
    }

    /// Create or reopen a session.
    pub fn create_session(&self, session_id: impl Into<String>) -> Arc<Session> {
        let backend = self.make_backend();
        self.create_session_with(session_id, backend)
    }

    /// Create or reopen a session; `backend` is used only if the session is
    /// new.
    pub fn create_session_with(
        &self,
        session_id: impl Into<String>,
        backend: Backend,
    ) -> Arc<Session> {
        let session_id = session_id.into();
        let mut sessions = self.sessions.write();

        if let Some(session) = sessions.get(&session_id) {
            session.clone()
        } else {
            let session = Arc::new(Session::with_id(
                session_id.clone(),
                self.config.clone(),
                backend,
            ));
            sessions.insert(session_id, session.clone());
            session
        }
    }

    /// Get an existing session.
    pub fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Close a session.
    pub fn close_session(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    /// List all active session IDs.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}

/// Convenience functions for quickly creating collaborative setups.
pub mod quick {
    use super::*;

    /// One replicated client per user name, all on a private network.
    pub fn create_collaborative_clients(user_names: &[&str]) -> Vec<Client> {
        let network = MemoryNetwork::new();
        user_names
            .iter()
            .map(|name| {
                let config = ClientConfigBuilder::new()
                    .user_name(*name)
                    .backend(BackendKind::Replicated)
                    .build();
                Client::with_network(config, network.clone())
            })
            .collect()
    }
}
