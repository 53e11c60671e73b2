//! # Weft Store
//!
//! The primitive store underneath the binding layer: replicated key/value
//! maps and ordered lists that hold [`Value`]s or further nested collections.
//!
//! ## Backends
//!
//! - [`noop`]: in-memory, single process, never emits remote events
//! - [`replicated`]: a yrs document per replica, exchanging encoded yrs
//!   updates and state vectors
//!
//! Consumers depend on the [`CrdtRoot`], [`CrdtFactory`], [`CrdtMap`] and
//! [`CrdtList`] traits only, so either backend can be swapped in.
//!
//! ## Events
//!
//! Collections report mutations that originated on *other* replicas, framed
//! by `RemoteBeforeTransaction` / `RemoteAfterTransaction`. Local writes are
//! never echoed back.

pub mod error;
pub mod event;
pub mod noop;
pub mod replicated;
pub mod traits;
pub mod value;

pub use error::{CollectionKind, Result, StoreError};
pub use event::{ListEvent, ListListener, Listeners, MapEvent, MapListener, Subscription};
pub use noop::{NoopFactory, NoopRoot};
pub use replicated::{ReplicatedDoc, ReplicatedFactory, ReplicatedList, ReplicatedMap};
pub use traits::{
    CollectionId, CrdtFactory, CrdtList, CrdtMap, CrdtRoot, Entry, FactoryHandle, ListHandle,
    MapExt, MapHandle, RootHandle, TransactExt, Transactional,
};
pub use value::Value;
