use thiserror::Error;

/// Failure of a summarization request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Request(String),
    #[error("Generation returned no text")]
    EmptyResponse,
    #[error("Generation unavailable: {0}")]
    Unavailable(String),
}

/// Failure of an embedding request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(String),
    #[error("Embedding unavailable: {0}")]
    Unavailable(String),
}
