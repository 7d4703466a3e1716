//! In-memory object source
//!
//! Holds objects in memory, paginates listings like a real provider and records
//! every call so tests can assert on the exact interaction sequence.

use super::error::{SourceError, SourceResult};
use super::{ObjectDescriptor, ObjectSource, ObjectStream, SourceObject};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// A recorded call against a [`MemorySource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    ListContainers,
    ListPage { container: String, page: usize },
    Open { container: String, key: String },
    Delete { container: String, key: String },
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, BTreeMap<String, StoredObject>>,
    failing_listings: HashSet<String>,
    failing_opens: HashSet<(String, String)>,
    failing_deletes: HashSet<(String, String)>,
    calls: Vec<SourceCall>,
}

/// In-memory [`ObjectSource`]
#[derive(Debug, Clone)]
pub struct MemorySource {
    state: Arc<Mutex<State>>,
    page_size: usize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Use a smaller listing page size to exercise pagination
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create an empty container
    pub fn add_container(&self, container: &str) {
        self.lock()
            .containers
            .entry(container.to_string())
            .or_default();
    }

    /// Add an object with `application/octet-stream` content
    pub fn add_object(&self, container: &str, key: &str, data: &[u8]) {
        self.add_object_with_type(container, key, data, "application/octet-stream");
    }

    pub fn add_object_with_type(&self, container: &str, key: &str, data: &[u8], content_type: &str) {
        self.lock()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data: Bytes::copy_from_slice(data),
                    content_type: content_type.to_string(),
                },
            );
    }

    /// Make every listing of `container` fail
    pub fn fail_listing(&self, container: &str) {
        self.lock().failing_listings.insert(container.to_string());
    }

    /// Make opening `container/key` fail with an I/O error
    pub fn fail_open(&self, container: &str, key: &str) {
        self.lock()
            .failing_opens
            .insert((container.to_string(), key.to_string()));
    }

    /// Make deleting `container/key` fail
    pub fn fail_delete(&self, container: &str, key: &str) {
        self.lock()
            .failing_deletes
            .insert((container.to_string(), key.to_string()));
    }

    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.lock()
            .containers
            .get(container)
            .is_some_and(|objects| objects.contains_key(key))
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<SourceCall> {
        self.lock().calls.clone()
    }

    pub fn open_count(&self) -> usize {
        self.count(|c| matches!(c, SourceCall::Open { .. }))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|c| matches!(c, SourceCall::Delete { .. }))
    }

    fn count(&self, pred: impl Fn(&SourceCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: SourceCall) {
        self.lock().calls.push(call);
    }

    /// Fetch one page of descriptors starting after `after`
    fn fetch_page(
        &self,
        container: &str,
        prefix: &str,
        after: Option<&str>,
        page: usize,
    ) -> SourceResult<(Vec<ObjectDescriptor>, Option<String>)> {
        let mut state = self.lock();
        state.calls.push(SourceCall::ListPage {
            container: container.to_string(),
            page,
        });

        if state.failing_listings.contains(container) {
            return Err(SourceError::service(
                "ListObjects",
                format!("listing of '{}' denied", container),
            ));
        }

        let objects = state
            .containers
            .get(container)
            .ok_or_else(|| SourceError::ContainerNotFound(container.to_string()))?;

        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| after.map_or(true, |a| key.as_str() > a));

        let entries: Vec<ObjectDescriptor> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, obj)| ObjectDescriptor {
                container: container.to_string(),
                key: key.clone(),
                size: obj.data.len() as u64,
                content_type: Some(obj.content_type.clone()),
            })
            .collect();

        let next = match (matching.next(), entries.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };

        Ok((entries, next))
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

/// Pagination cursor: `None` once the listing is exhausted
struct PageCursor {
    after: Option<String>,
    page: usize,
}

#[async_trait]
impl ObjectSource for MemorySource {
    async fn list_containers(&self) -> SourceResult<Vec<String>> {
        let mut state = self.lock();
        state.calls.push(SourceCall::ListContainers);
        Ok(state.containers.keys().cloned().collect())
    }

    fn list_objects(&self, container: &str, prefix: Option<&str>) -> ObjectStream {
        let source = self.clone();
        let container = container.to_string();
        let prefix = prefix.unwrap_or_default().to_string();

        stream::unfold(
            Some(PageCursor { after: None, page: 0 }),
            move |cursor| {
                let source = source.clone();
                let container = container.clone();
                let prefix = prefix.clone();

                async move {
                    let cursor = cursor?;
                    match source.fetch_page(&container, &prefix, cursor.after.as_deref(), cursor.page) {
                        Ok((entries, next)) => {
                            let next_cursor = next.map(|after| PageCursor {
                                after: Some(after),
                                page: cursor.page + 1,
                            });
                            Some((stream::iter(entries.into_iter().map(Ok)).boxed(), next_cursor))
                        }
                        Err(e) => Some((stream::once(async move { Err(e) }).boxed(), None)),
                    }
                }
            },
        )
        .flatten()
        .boxed()
    }

    async fn open_object(&self, container: &str, key: &str) -> SourceResult<SourceObject> {
        let mut state = self.lock();
        state.calls.push(SourceCall::Open {
            container: container.to_string(),
            key: key.to_string(),
        });

        if state
            .failing_opens
            .contains(&(container.to_string(), key.to_string()))
        {
            return Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset while opening object",
            )));
        }

        let object = state
            .containers
            .get(container)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })?;

        Ok(SourceObject {
            size: object.data.len() as u64,
            content_type: object.content_type,
            reader: Box::new(Cursor::new(object.data)),
        })
    }

    async fn delete_object(&self, container: &str, key: &str) -> SourceResult<()> {
        self.record(SourceCall::Delete {
            container: container.to_string(),
            key: key.to_string(),
        });

        let mut state = self.lock();
        if state
            .failing_deletes
            .contains(&(container.to_string(), key.to_string()))
        {
            return Err(SourceError::service("DeleteObject", "access denied"));
        }

        if let Some(objects) = state.containers.get_mut(container) {
            objects.remove(key);
        }
        Ok(())
    }

    fn source_name(&self) -> &str {
        "memory"
    }
}
