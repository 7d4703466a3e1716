//! Error types for destination store operations

use std::io;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`ContentStore`](super::ContentStore)
#[derive(Error, Debug)]
pub enum StoreError {
    /// Allocation id does not resolve
    #[error("Allocation not found: {0}")]
    AllocationNotFound(String),

    /// Path not found in the allocation
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Stream ended before the declared size was written
    #[error("Size mismatch for {path}: expected {expected} bytes, received {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// Upload did not reach a successful state
    #[error("Upload of {path} failed: {message}")]
    UploadFailed { path: String, message: String },

    /// Metadata commit rejected
    #[error("Commit of {path} failed: {message}")]
    CommitFailed { path: String, message: String },

    /// Operation not supported by this store
    #[error("Operation '{operation}' not supported by {store}")]
    Unsupported { store: String, operation: String },

    /// Path is invalid or escapes the allocation
    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Journal serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::AllocationNotFound(_)
        )
    }
}
