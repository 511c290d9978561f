//! Service error taxonomy.
//!
//! Every failure the HTTP boundary can surface is one of these variants,
//! so handlers map errors to status codes without string matching.
//! Validation and admission failures are rejected at the boundary before
//! any external call; generation failures propagate as the final outcome
//! of the request; durable chat-write failures are logged and swallowed
//! upstream and never reach this type.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed, oversized, or undersized question.
    #[error("{0}")]
    Validation(String),

    /// Sliding-window admission control rejected the request.
    #[error("Rate limit exceeded. Try again in {retry_after:?}.")]
    RateLimited { retry_after: Duration },

    /// Bearer token missing, malformed, or failed verification.
    #[error("{0}")]
    Authentication(String),

    /// Referenced session or document does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Upload produced zero chunks; nothing was indexed.
    #[error("no text could be extracted from the document")]
    NoExtractableText,

    /// Unrecognized file extension at upload time.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// Embedding length disagrees with the index dimension. A config error
    /// between the embedding provider and the index; fatal.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The generation call exceeded its deadline. Distinct from
    /// [`ServiceError::GenerationFailed`] so callers can retry generation
    /// without re-running retrieval.
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    /// The generation provider returned an error.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Machine-readable code for the HTTP error contract.
impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_failed",
            ServiceError::RateLimited { .. } => "rate_limited",
            ServiceError::Authentication(_) => "authentication_failed",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::NoExtractableText => "no_extractable_text",
            ServiceError::UnsupportedType(_) => "unsupported_type",
            ServiceError::DimensionMismatch { .. } => "internal",
            ServiceError::GenerationTimeout(_) => "generation_timeout",
            ServiceError::GenerationFailed(_) => "generation_failed",
            ServiceError::Internal(_) => "internal",
        }
    }
}
