//! Typed errors for the embedding and vector index capabilities.
//!
//! Both capabilities are fallible and may be slow; callers decide whether a
//! failure is fatal (the indexing coordinator marks the document stale and
//! retries) or merely degrades a response (the context assembler omits the
//! section).

use thiserror::Error;

/// Failure of an [`Embedder`](crate::embedding::Embedder) call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmbedError {
    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding timed out after {0} ms")]
    Timeout(u64),

    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Failure of a [`VectorIndex`](crate::index::VectorIndex) operation.
///
/// The index fails closed: a failing query surfaces one of these rather
/// than returning partial results.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("vector index storage error: {0}")]
    Storage(String),

    #[error("vector index timed out after {0} ms")]
    Timeout(u64),

    #[error("vector has {actual} dimensions, index holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type EmbedResult<T> = std::result::Result<T, EmbedError>;
pub type IndexResult<T> = std::result::Result<T, IndexError>;
