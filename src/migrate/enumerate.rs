//! Source enumeration
//!
//! Resolves the container set for a run and turns each container listing into
//! a flat stream of transferable descriptors. Directory markers (zero-size
//! objects) are dropped here and counted.

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::source::{ObjectDescriptor, ObjectSource};

/// Descriptor stream with listing failures already mapped to run-fatal errors
pub type DescriptorStream = BoxStream<'static, Result<ObjectDescriptor>>;

/// Lists containers and their objects from one source
#[derive(Clone)]
pub struct Enumerator {
    source: Arc<dyn ObjectSource>,
    directory_markers: Arc<AtomicU64>,
}

impl Enumerator {
    pub fn new(source: Arc<dyn ObjectSource>) -> Self {
        Self {
            source,
            directory_markers: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Containers to migrate: the explicit list, or every container the source exposes
    pub async fn containers(&self, requested: &[String]) -> Result<Vec<String>> {
        if !requested.is_empty() {
            return Ok(requested.to_vec());
        }

        let discovered = self
            .source
            .list_containers()
            .await
            .map_err(|e| MigrateError::Listing {
                container: "*".to_string(),
                message: e.to_string(),
            })?;

        info!(
            source = self.source.source_name(),
            count = discovered.len(),
            "discovered containers"
        );
        Ok(discovered)
    }

    /// Lazy stream of non-empty objects in `container` under `prefix`
    ///
    /// Each call restarts the listing from the first page.
    pub fn objects(&self, container: &str, prefix: Option<&str>) -> DescriptorStream {
        let markers = self.directory_markers.clone();
        let name = container.to_string();

        self.source
            .list_objects(container, prefix)
            .map_err(move |e| MigrateError::Listing {
                container: name.clone(),
                message: e.to_string(),
            })
            .try_filter(move |desc| {
                let keep = !desc.is_directory_marker();
                if !keep {
                    markers.fetch_add(1, Ordering::Relaxed);
                    debug!(container = %desc.container, key = %desc.key, "ignoring directory marker");
                }
                futures::future::ready(keep)
            })
            .boxed()
    }

    /// Zero-size objects dropped so far
    pub fn directory_markers(&self) -> u64 {
        self.directory_markers.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[tokio::test]
    async fn test_explicit_containers_skip_discovery() {
        let source = MemorySource::new();
        source.add_container("b1");
        source.add_container("b2");
        let enumerator = Enumerator::new(Arc::new(source.clone()));

        let containers = enumerator.containers(&["b2".to_string()]).await.unwrap();
        assert_eq!(containers, vec!["b2"]);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_list_discovers_all() {
        let source = MemorySource::new();
        source.add_container("b1");
        source.add_container("b2");
        let enumerator = Enumerator::new(Arc::new(source));

        let containers = enumerator.containers(&[]).await.unwrap();
        assert_eq!(containers, vec!["b1", "b2"]);
    }

    #[tokio::test]
    async fn test_zero_size_objects_are_dropped() {
        let source = MemorySource::new().with_page_size(1);
        source.add_object("b1", "dir/", b"");
        source.add_object("b1", "dir/a.txt", b"0123456789");
        source.add_object("b1", "empty.txt", b"");
        let enumerator = Enumerator::new(Arc::new(source));

        let objects: Vec<ObjectDescriptor> =
            enumerator.objects("b1", None).try_collect().await.unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "dir/a.txt");
        assert_eq!(objects[0].size, 10);
        assert_eq!(enumerator.directory_markers(), 2);
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let source = MemorySource::new();
        source.add_object("b1", "a", b"1");
        source.fail_listing("b1");
        let enumerator = Enumerator::new(Arc::new(source));

        let err = enumerator
            .objects("b1", None)
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Listing { ref container, .. } if container == "b1"));
        assert!(err.is_fatal());
    }
}
