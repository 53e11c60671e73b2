//! Error types for the document model.

use thiserror::Error;
use weft_bind::BindError;
use weft_store::StoreError;

/// Errors that can occur in document model operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Invalid tag: {0:?}")]
    InvalidTag(String),

    #[error("Invalid color: {0:?}")]
    InvalidColor(String),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ModelError>;
