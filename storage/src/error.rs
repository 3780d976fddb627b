//! Storage error types.
//!
//! Used by the [`Store`](crate::Store) implementations and surfaced to callers of
//! mutating engine operations.

use thiserror::Error;

/// Errors that can occur when using storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    /// A lore keyword already exists in the conversation's lore set.
    #[error("Duplicate lore keyword: {0}")]
    DuplicateKeyword(String),
    /// A write referenced rows that belong to another conversation.
    #[error("Cross-conversation write rejected: {0}")]
    CrossConversation(String),
    /// A snapshot would be placed before an already committed one.
    #[error("Out of order: {0}")]
    OutOfOrder(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Maps a unique-constraint violation to `on_unique`, everything else to [`StorageError::Database`].
pub(crate) fn map_unique(err: sqlx::Error, on_unique: impl FnOnce() -> StorageError) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => on_unique(),
        _ => StorageError::Database(err),
    }
}
