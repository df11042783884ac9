//! Common error types for Sonara

use thiserror::Error;

/// Common result type for Sonara operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Sonara services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding vector length does not match the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No stored embedding exists for the given reference track
    #[error("Reference track not found: {0}")]
    ReferenceNotFound(i64),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Embedding extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a transient infrastructure failure worth
    /// retrying (store unreachable, I/O trouble) as opposed to a business
    /// outcome or bad input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_) | Error::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_message() {
        let err = Error::DimensionMismatch {
            expected: 512,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 512, got 3");
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::Internal("store unreachable".into()).is_retryable());
        assert!(!Error::ReferenceNotFound(7).is_retryable());
        assert!(!Error::InvalidInput("bad limit".into()).is_retryable());
    }
}
