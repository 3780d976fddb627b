//! Engine error taxonomy.
//!
//! Callers of mutating operations receive either a committed result or one of
//! these kinds. Collaborator failures inside background consolidation are logged
//! and deferred; they only reach callers through [`EngineError::Collaborator`]
//! when a collaborator is invoked synchronously.

use std::time::Duration;
use tavern_generation::{EmbeddingError, GenerationError};
use tavern_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input, rejected before anything is persisted.
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Collaborator error: {0}")]
    Collaborator(String),
    /// Lore keyword collision.
    #[error("Duplicate lore keyword: {0}")]
    DuplicateKeyword(String),
    /// A reference that does not resolve, e.g. a rollback target that does not exist.
    #[error("Consistency error: {0}")]
    Consistency(String),
    #[error("Cross-conversation write rejected: {0}")]
    CrossConversation(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateKeyword(keyword) => EngineError::DuplicateKeyword(keyword),
            StorageError::CrossConversation(msg) => EngineError::CrossConversation(msg),
            StorageError::NotFound(msg)
            | StorageError::OutOfOrder(msg)
            | StorageError::Conflict(msg) => EngineError::Consistency(msg),
            other => EngineError::Storage(other),
        }
    }
}

impl From<GenerationError> for EngineError {
    fn from(err: GenerationError) -> Self {
        EngineError::Collaborator(err.to_string())
    }
}

impl From<EmbeddingError> for EngineError {
    fn from(err: EmbeddingError) -> Self {
        EngineError::Collaborator(err.to_string())
    }
}
