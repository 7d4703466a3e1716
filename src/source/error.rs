//! Error types for source operations

use std::io;
use thiserror::Error;

/// Result type alias for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by an [`ObjectSource`](super::ObjectSource)
#[derive(Error, Debug)]
pub enum SourceError {
    /// Object not found in container
    #[error("Object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    /// Container not found or not accessible
    #[error("Container not found or not accessible: {0}")]
    ContainerNotFound(String),

    /// Provider SDK or service error
    #[error("{operation} failed: {message}")]
    Service { operation: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SourceError {
    pub fn service(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SourceError::Service {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound { .. })
    }
}
