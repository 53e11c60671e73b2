//! Error types for the binding layer.

use thiserror::Error;
use weft_store::StoreError;

/// Errors that can occur in binding operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("Key already exists: {0}")]
    DuplicateKey(String),

    #[error("No value stored for '{0}'")]
    MissingValue(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Cannot decode '{key}': {message}")]
    Decode { key: String, message: String },

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BindError {
    pub(crate) fn decode(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        BindError::Decode {
            key: key.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BindError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BindError>;
