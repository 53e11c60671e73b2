//! # Weft Bind
//!
//! Typed views over the primitive store. Application code reads and writes
//! ordinary Rust values; the bindings translate to store entries and keep
//! local caches in step with remote changes.
//!
//! ## Bindings
//!
//! - [`CrdtProp`]: one map key as one typed value
//! - [`CrdtObject`]: a nested record stored under flattened paths
//! - [`MappedCrdtMap`]: keyed collection of domain objects
//! - [`MappedCrdtOrderedMap`]: keyed collection with a replicated order
//! - [`CrdtMappedList`]: index-ordered sequence of domain objects
//!
//! Every binding holds its collection through a [`Watchable`], so the
//! collection can be swapped out from under it (for example when a document
//! is re-bound to a fresh session) without rebuilding the binding.
//!
//! ## Example
//!
//! ```rust
//! use weft_bind::CrdtProp;
//! use weft_store::{CrdtRoot, NoopRoot};
//!
//! let root = NoopRoot::new();
//! let title: CrdtProp<String> = CrdtProp::new(root.get_map("meta").unwrap(), "title");
//! title.set(&"Untitled".to_string()).unwrap();
//! assert_eq!(title.get().unwrap().as_deref(), Some("Untitled"));
//! ```

pub mod error;
mod follow;
pub mod mapped_list;
pub mod mapped_map;
pub mod mapper;
pub mod object;
pub mod ordered_map;
pub mod path;
pub mod prop;
pub mod watchable;

pub use error::{BindError, Result};
pub use mapped_list::CrdtMappedList;
pub use mapped_map::MappedCrdtMap;
pub use mapper::{CollectionEvent, CrdtMapper, SequenceEvent, ValueMapper};
pub use object::{CrdtObject, ObjectWriter};
pub use ordered_map::MappedCrdtOrderedMap;
pub use prop::CrdtProp;
pub use watchable::Watchable;
