//! Error types for the Weft SDK.

use std::fmt;
use weft_bind::BindError;
use weft_store::StoreError;

/// Error type for SDK operations.
#[derive(Debug)]
pub enum SdkError {
    /// Connection failed.
    ConnectionFailed(String),
    /// Sync error.
    SyncError(String),
    /// Network error.
    NetworkError(String),
    /// Serialization error.
    SerializationError(String),
    /// The primary store rejected an operation.
    Store(StoreError),
    /// A binding rejected an operation.
    Bind(BindError),
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            SdkError::SyncError(e) => write!(f, "Sync error: {}", e),
            SdkError::NetworkError(e) => write!(f, "Network error: {}", e),
            SdkError::SerializationError(e) => write!(f, "Serialization error: {}", e),
            SdkError::Store(e) => write!(f, "Store error: {}", e),
            SdkError::Bind(e) => write!(f, "Binding error: {}", e),
        }
    }
}

impl std::error::Error for SdkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SdkError::Store(e) => Some(e),
            SdkError::Bind(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SdkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => SdkError::SerializationError(e),
            other => SdkError::Store(other),
        }
    }
}

impl From<BindError> for SdkError {
    fn from(err: BindError) -> Self {
        SdkError::Bind(err)
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::SerializationError(err.to_string())
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
