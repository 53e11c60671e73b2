//! Weft SDK - sessions and sync for collaborative documents
//!
//! The SDK decides which store backend a document runs on and keeps
//! replicated documents in step with their peers. The binding layer and the
//! domain model above it only ever see a [`weft_store::CrdtRoot`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use weft_sdk::{Backend, ClientConfig, MemoryNetwork, Session, SyncConfig};
//! use weft_store::{CrdtRoot, MapExt};
//!
//! # async fn demo() -> weft_sdk::Result<()> {
//! let network = MemoryNetwork::new();
//! let backend = Backend::replicated_on("alice", network.clone(), SyncConfig::default());
//! let session = Session::new(ClientConfig::default(), backend);
//! session
//!     .connect("mem://board", |status, details| println!("{:?}: {}", status, details))
//!     .await?;
//!
//! let meta = session.root().get_map("meta")?;
//! meta.set_value("title", "Roadmap")?;
//! session.flush().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`client`] - Client configuration and session bookkeeping
//! - [`connection`] - Backends and the connect/disconnect protocol
//! - [`session`] - One user's view of one document
//! - [`sync`] - Update exchange between replicas
//! - [`network`] - Network transport abstractions
//! - [`presence`] - Ephemeral user and cursor state
//! - [`error`] - Error types

pub mod client;
pub mod connection;
pub mod error;
pub mod network;
pub mod presence;
pub mod session;
pub mod sync;

// Re-exports for convenience
pub use client::{Client, ClientConfig, ClientConfigBuilder};
pub use connection::{
    Backend, BackendKind, ConnectionStatus, NoopConnection, Progress, ReplicatedConnection,
    SyncConnection,
};
pub use error::{Result, SdkError};
pub use network::{
    MemoryNetwork, MemoryTransport, Message, NetworkTransport, Peer, PeerId, PeerState,
};
pub use presence::{Awareness, AwarenessEvent, AwarenessState, CursorState, UserState};
pub use session::{Session, SessionEvent};
pub use sync::{SyncConfig, SyncConfigBuilder, SyncEvent, SyncManager};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{Client, ClientConfig};
    pub use crate::connection::{Backend, ConnectionStatus};
    pub use crate::error::SdkError;
    pub use crate::presence::{Awareness, CursorState, UserState};
    pub use crate::session::Session;
    pub use crate::sync::SyncConfig;
}
