//! Destination content stores
//!
//! The migration pipeline writes through any [`ContentStore`]. Implementations:
//!
//! - [`LocalStore`]: allocations as directories on a local filesystem
//! - [`MemoryStore`]: in-memory allocations that record every call

mod error;
mod local;
mod memory;

pub use error::{StoreError, StoreResult};
pub use local::LocalStore;
pub use memory::{MemoryStore, StoreCall};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::WhoPays;
use crate::source::ObjectReader;

/// Housekeeping names never considered part of migrated content
pub const HOUSEKEEPING_EXCLUDES: &[&str] = &[".DS_Store", ".git"];

/// Resolved handle to one destination allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub id: String,
}

impl Allocation {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Attributes attached to an upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Encrypt content at the destination
    pub encrypt: bool,

    /// Party charged for reads of this object
    pub who_pays: Option<WhoPays>,
}

/// Operation recorded by a metadata commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOperation {
    Upload,
    Update,
    Delete,
}

impl fmt::Display for CommitOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOperation::Upload => write!(f, "Upload"),
            CommitOperation::Update => write!(f, "Update"),
            CommitOperation::Delete => write!(f, "Delete"),
        }
    }
}

/// True when `path` has an excluded name as one of its components
pub fn is_excluded(path: &str, exclude: &[&str]) -> bool {
    path.split('/')
        .any(|component| exclude.iter().any(|ex| component == ex.trim_end_matches('/')))
}

/// Write side of a migration
///
/// Every operation completes only once its outcome is definitive: an `Ok` from
/// [`upload_stream`](ContentStore::upload_stream) means the object is stored.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Resolve an allocation id to a handle
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AllocationNotFound` if the id is unknown.
    async fn resolve_allocation(&self, id: &str) -> StoreResult<Allocation>;

    /// Every stored file with its size, keyed by `/`-rooted path
    ///
    /// Paths with a component listed in `exclude` are left out.
    async fn list_all_files(
        &self,
        allocation: &Allocation,
        exclude: &[&str],
    ) -> StoreResult<HashMap<String, u64>>;

    /// Stream `size` bytes from `reader` to `path`
    async fn upload_stream(
        &self,
        allocation: &Allocation,
        path: &str,
        reader: ObjectReader,
        size: u64,
        content_type: &str,
        options: UploadOptions,
    ) -> StoreResult<()>;

    /// Remove a stored file
    async fn delete_file(&self, allocation: &Allocation, path: &str) -> StoreResult<()>;

    /// Record a metadata transaction for `path`
    async fn commit_metadata(
        &self,
        allocation: &Allocation,
        path: &str,
        operation: CommitOperation,
    ) -> StoreResult<()>;

    /// Whether uploads with `encrypt` set can be honoured
    fn supports_encryption(&self) -> bool {
        false
    }

    /// Short name used in log output
    fn store_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_excluded() {
        assert!(is_excluded("/b1/.git/config", HOUSEKEEPING_EXCLUDES));
        assert!(is_excluded("/photos/.DS_Store", HOUSEKEEPING_EXCLUDES));
        assert!(!is_excluded("/b1/git/config", HOUSEKEEPING_EXCLUDES));
        assert!(!is_excluded("/b1/a.gitignore", HOUSEKEEPING_EXCLUDES));
    }

    #[test]
    fn test_trailing_slash_in_exclude() {
        assert!(is_excluded("/b1/.git/HEAD", &[".git/"]));
    }

    #[test]
    fn test_commit_operation_display() {
        assert_eq!(CommitOperation::Upload.to_string(), "Upload");
    }
}
