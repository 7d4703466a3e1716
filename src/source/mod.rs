//! Source object stores
//!
//! The migration pipeline reads from any [`ObjectSource`]. Two implementations
//! ship with the crate:
//!
//! - `S3Source` (feature `s3-native`): AWS S3 and S3-compatible services
//! - [`MemorySource`]: in-memory objects, used by tests and local dry runs

mod error;
mod memory;

#[cfg(feature = "s3-native")]
mod s3;

pub use error::{SourceError, SourceResult};
pub use memory::{MemorySource, SourceCall};

#[cfg(feature = "s3-native")]
pub use s3::S3Source;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

/// Streaming reader over an object's bytes
pub type ObjectReader = Box<dyn AsyncRead + Unpin + Send>;

/// Lazy, flat sequence of descriptors for one container
pub type ObjectStream = BoxStream<'static, SourceResult<ObjectDescriptor>>;

/// One listed source object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Container (bucket) holding the object
    pub container: String,

    /// Object key within the container
    pub key: String,

    /// Size in bytes
    pub size: u64,

    /// MIME type, when the listing provides one
    pub content_type: Option<String>,
}

impl ObjectDescriptor {
    pub fn new(container: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            size,
            content_type: None,
        }
    }

    /// Zero-size objects are directory markers and never transferred
    pub fn is_directory_marker(&self) -> bool {
        self.size == 0
    }

    /// Destination path: `/<container>/<key>`
    pub fn destination_path(&self) -> String {
        format!("/{}/{}", self.container, self.key)
    }
}

/// An opened source object ready to be streamed
pub struct SourceObject {
    pub reader: ObjectReader,
    pub size: u64,
    pub content_type: String,
}

impl std::fmt::Debug for SourceObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceObject")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Read side of a migration
///
/// Implementors must be `Send + Sync`: one source is shared by every transfer task.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Names of every container visible to the caller
    async fn list_containers(&self) -> SourceResult<Vec<String>>;

    /// Objects in `container` whose key starts with `prefix`
    ///
    /// Pagination is hidden behind the stream. A page that fails to load
    /// surfaces as an `Err` item.
    fn list_objects(&self, container: &str, prefix: Option<&str>) -> ObjectStream;

    /// Open an object for streaming
    ///
    /// # Errors
    ///
    /// Returns `SourceError::NotFound` if the key does not exist.
    async fn open_object(&self, container: &str, key: &str) -> SourceResult<SourceObject>;

    /// Remove an object
    async fn delete_object(&self, container: &str, key: &str) -> SourceResult<()>;

    /// Short name used in log output
    fn source_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_path() {
        let desc = ObjectDescriptor::new("b1", "dir/a.txt", 10);
        assert_eq!(desc.destination_path(), "/b1/dir/a.txt");
    }

    #[test]
    fn test_directory_marker() {
        assert!(ObjectDescriptor::new("b1", "dir/", 0).is_directory_marker());
        assert!(!ObjectDescriptor::new("b1", "a.txt", 1).is_directory_marker());
    }
}
