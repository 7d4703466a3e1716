/*!
 * Error types for dstore-migrate
 */

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrateError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum MigrateError {
    /// Invalid or missing configuration, raised before any work begins
    #[error("Configuration error: {0}")]
    Config(String),

    /// Destination allocation could not be resolved or listed
    #[error("Allocation error: {0}")]
    Allocation(String),

    /// A source container could not be listed
    #[error("Listing error for container '{container}': {message}")]
    Listing { container: String, message: String },

    /// Opening or uploading a single object failed
    #[error("Transfer error for {path}: {message}")]
    Transfer { path: String, message: String },

    /// Deleting a stale destination copy or a migrated source object failed
    #[error("Delete error for {target}: {message}")]
    Delete { target: String, message: String },

    /// Metadata commit after a successful upload failed
    #[error("Commit error for {path}: {message}")]
    Commit { path: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MigrateError {
    /// Fatal errors abort the whole run; everything else is contained to one item
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_) | MigrateError::Allocation(_) | MigrateError::Listing { .. }
        )
    }

    /// Get the process exit code for this error
    ///
    /// Per-item failures never change the exit status of a run.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            EXIT_FATAL
        } else {
            EXIT_SUCCESS
        }
    }

    /// Short category label used in log fields
    pub fn category(&self) -> &'static str {
        match self {
            MigrateError::Config(_) => "config",
            MigrateError::Allocation(_) => "allocation",
            MigrateError::Listing { .. } => "listing",
            MigrateError::Transfer { .. } => "transfer",
            MigrateError::Delete { .. } => "delete",
            MigrateError::Commit { .. } => "commit",
            MigrateError::Io(_) => "io",
        }
    }
}

impl From<toml::de::Error> for MigrateError {
    fn from(err: toml::de::Error) -> Self {
        MigrateError::Config(format!("TOML parse error: {}", err))
    }
}
