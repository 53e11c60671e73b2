//! Error types for the primitive store.

use std::fmt;
use thiserror::Error;

/// Which kind of collection a root name is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Map,
    List,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::Map => write!(f, "map"),
            CollectionKind::List => write!(f, "list"),
        }
    }
}

/// Errors that can occur in store operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Root collection '{name}' already exists as a {existing}")]
    KindMismatch {
        name: String,
        existing: CollectionKind,
    },

    #[error("Collection {0} is already attached to a parent")]
    AlreadyAttached(String),

    #[error("Collection {0} belongs to a different document")]
    ForeignCollection(String),

    #[error("Invalid index: {index} (length: {length})")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Malformed update: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
