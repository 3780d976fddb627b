//! # Generation collaborators
//!
//! Interfaces for the two external services the memory engine depends on: a
//! [`Summarizer`] that condenses ordered texts into one summary and an
//! [`Embedder`] that stores a text in a vector index and returns its id.
//!
//! Implementations live outside the engine. [`Offline`] is the stand-in used by
//! tools that only read or administer state: every call fails, so the engine
//! defers consolidation instead of inventing summaries.

use async_trait::async_trait;

mod error;

pub use error::{EmbeddingError, GenerationError};

/// Condenses ordered source texts into a single summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarizes `texts` in the given order. Used both to fold messages into a
    /// MICRO summary and to merge MICRO summaries into a MACRO summary.
    async fn summarize(&self, texts: &[String]) -> Result<String, GenerationError>;
}

/// Stores a text in a vector index.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds `text` and returns the opaque vector id.
    async fn embed(&self, text: &str) -> Result<String, EmbeddingError>;
}

/// Collaborator for processes without access to a model backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

#[async_trait]
impl Summarizer for Offline {
    async fn summarize(&self, _texts: &[String]) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable("no summarizer configured".to_string()))
    }
}

#[async_trait]
impl Embedder for Offline {
    async fn embed(&self, _text: &str) -> Result<String, EmbeddingError> {
        Err(EmbeddingError::Unavailable("no embedder configured".to_string()))
    }
}
