//! In-memory content store
//!
//! Allocations live in memory. Every call is recorded, and the number of
//! uploads running at the same moment is tracked so concurrency limits can be
//! observed from tests.

use super::error::{StoreError, StoreResult};
use super::{is_excluded, Allocation, CommitOperation, ContentStore, UploadOptions};
use crate::source::ObjectReader;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// A recorded call against a [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Resolve { id: String },
    ListAll { id: String },
    Upload { path: String, size: u64, options: UploadOptions },
    Delete { path: String },
    Commit { path: String, operation: CommitOperation },
}

/// A file held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub data: Vec<u8>,
    pub content_type: String,
    pub options: UploadOptions,
}

#[derive(Debug, Default)]
struct State {
    allocations: HashMap<String, BTreeMap<String, StoredFile>>,
    failing_uploads: HashSet<String>,
    failing_deletes: HashSet<String>,
    failing_commits: HashSet<String>,
    failing_listing: bool,
    committed: Vec<(String, CommitOperation)>,
    calls: Vec<StoreCall>,
}

/// In-memory [`ContentStore`]
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    active_uploads: Arc<AtomicUsize>,
    peak_uploads: Arc<AtomicUsize>,
    upload_delay: Option<Duration>,
    encryption: bool,
}

/// Decrements the active-upload gauge when an upload ends, however it ends
struct ActiveUpload<'a>(&'a AtomicUsize);

impl Drop for ActiveUpload<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            active_uploads: Arc::new(AtomicUsize::new(0)),
            peak_uploads: Arc::new(AtomicUsize::new(0)),
            upload_delay: None,
            encryption: false,
        }
    }

    /// Hold every upload open for `delay` before it completes
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    /// Advertise encryption support
    pub fn with_encryption(mut self) -> Self {
        self.encryption = true;
        self
    }

    /// Create an empty allocation
    pub fn add_allocation(&self, id: &str) {
        self.lock().allocations.entry(id.to_string()).or_default();
    }

    /// Seed a file directly, bypassing the call log
    pub fn put_file(&self, id: &str, path: &str, data: &[u8]) {
        self.lock()
            .allocations
            .entry(id.to_string())
            .or_default()
            .insert(
                path.to_string(),
                StoredFile {
                    data: data.to_vec(),
                    content_type: "application/octet-stream".to_string(),
                    options: UploadOptions::default(),
                },
            );
    }

    pub fn fail_upload(&self, path: &str) {
        self.lock().failing_uploads.insert(path.to_string());
    }

    pub fn fail_delete(&self, path: &str) {
        self.lock().failing_deletes.insert(path.to_string());
    }

    pub fn fail_commit(&self, path: &str) {
        self.lock().failing_commits.insert(path.to_string());
    }

    /// Make `list_all_files` fail for every allocation
    pub fn fail_listing(&self) {
        self.lock().failing_listing = true;
    }

    pub fn file(&self, id: &str, path: &str) -> Option<StoredFile> {
        self.lock()
            .allocations
            .get(id)
            .and_then(|files| files.get(path))
            .cloned()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Successful commits, in order
    pub fn committed(&self) -> Vec<(String, CommitOperation)> {
        self.lock().committed.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Upload { .. }))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Delete { .. }))
    }

    pub fn commit_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Commit { .. }))
    }

    /// Highest number of uploads observed in flight at once
    pub fn peak_concurrent_uploads(&self) -> usize {
        self.peak_uploads.load(Ordering::SeqCst)
    }

    pub fn active_uploads(&self) -> usize {
        self.active_uploads.load(Ordering::SeqCst)
    }

    fn count(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: StoreCall) {
        self.lock().calls.push(call);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn resolve_allocation(&self, id: &str) -> StoreResult<Allocation> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Resolve { id: id.to_string() });
        if state.allocations.contains_key(id) {
            Ok(Allocation::new(id))
        } else {
            Err(StoreError::AllocationNotFound(id.to_string()))
        }
    }

    async fn list_all_files(
        &self,
        allocation: &Allocation,
        exclude: &[&str],
    ) -> StoreResult<HashMap<String, u64>> {
        let mut state = self.lock();
        state.calls.push(StoreCall::ListAll {
            id: allocation.id.clone(),
        });

        if state.failing_listing {
            return Err(StoreError::Io(std::io::Error::other("listing unavailable")));
        }

        let files = state
            .allocations
            .get(&allocation.id)
            .ok_or_else(|| StoreError::AllocationNotFound(allocation.id.clone()))?;

        Ok(files
            .iter()
            .filter(|(path, _)| !is_excluded(path, exclude))
            .map(|(path, file)| (path.clone(), file.data.len() as u64))
            .collect())
    }

    async fn upload_stream(
        &self,
        allocation: &Allocation,
        path: &str,
        mut reader: ObjectReader,
        size: u64,
        content_type: &str,
        options: UploadOptions,
    ) -> StoreResult<()> {
        self.record(StoreCall::Upload {
            path: path.to_string(),
            size,
            options,
        });

        let current = self.active_uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_uploads.fetch_max(current, Ordering::SeqCst);
        let _active = ActiveUpload(&self.active_uploads);

        let mut data = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut data).await?;

        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.failing_uploads.contains(path) {
            return Err(StoreError::UploadFailed {
                path: path.to_string(),
                message: "upload did not complete".to_string(),
            });
        }
        if data.len() as u64 != size {
            return Err(StoreError::SizeMismatch {
                path: path.to_string(),
                expected: size,
                actual: data.len() as u64,
            });
        }

        let files = state
            .allocations
            .get_mut(&allocation.id)
            .ok_or_else(|| StoreError::AllocationNotFound(allocation.id.clone()))?;
        files.insert(
            path.to_string(),
            StoredFile {
                data,
                content_type: content_type.to_string(),
                options,
            },
        );
        Ok(())
    }

    async fn delete_file(&self, allocation: &Allocation, path: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Delete {
            path: path.to_string(),
        });

        if state.failing_deletes.contains(path) {
            return Err(StoreError::Io(std::io::Error::other("delete rejected")));
        }

        state
            .allocations
            .get_mut(&allocation.id)
            .and_then(|files| files.remove(path))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn commit_metadata(
        &self,
        _allocation: &Allocation,
        path: &str,
        operation: CommitOperation,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Commit {
            path: path.to_string(),
            operation,
        });

        if state.failing_commits.contains(path) {
            return Err(StoreError::CommitFailed {
                path: path.to_string(),
                message: "transaction rejected".to_string(),
            });
        }

        state.committed.push((path.to_string(), operation));
        Ok(())
    }

    fn supports_encryption(&self) -> bool {
        self.encryption
    }

    fn store_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::HOUSEKEEPING_EXCLUDES;
    use std::io::Cursor;

    fn reader(data: &'static [u8]) -> ObjectReader {
        Box::new(Cursor::new(data))
    }

    #[tokio::test]
    async fn test_unknown_allocation() {
        let store = MemoryStore::new();
        let err = store.resolve_allocation("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::AllocationNotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_then_list() {
        let store = MemoryStore::new();
        store.add_allocation("a1");
        let alloc = store.resolve_allocation("a1").await.unwrap();

        store
            .upload_stream(&alloc, "/b1/x", reader(b"12345"), 5, "text/plain", UploadOptions::default())
            .await
            .unwrap();

        let files = store.list_all_files(&alloc, HOUSEKEEPING_EXCLUDES).await.unwrap();
        assert_eq!(files.get("/b1/x"), Some(&5));
        assert_eq!(store.active_uploads(), 0);
        assert_eq!(store.peak_concurrent_uploads(), 1);
    }

    #[tokio::test]
    async fn test_short_stream_is_rejected() {
        let store = MemoryStore::new();
        store.add_allocation("a1");
        let alloc = Allocation::new("a1");

        let err = store
            .upload_stream(&alloc, "/b1/x", reader(b"123"), 8, "text/plain", UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { expected: 8, actual: 3, .. }));
        assert!(store.file("a1", "/b1/x").is_none());
        assert_eq!(store.active_uploads(), 0);
    }

    #[tokio::test]
    async fn test_listing_skips_housekeeping() {
        let store = MemoryStore::new();
        store.put_file("a1", "/b1/.git/HEAD", b"ref");
        store.put_file("a1", "/b1/keep", b"k");
        let alloc = Allocation::new("a1");

        let files = store.list_all_files(&alloc, HOUSEKEEPING_EXCLUDES).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("/b1/keep"));
    }

    #[tokio::test]
    async fn test_failed_commit_is_reported() {
        let store = MemoryStore::new();
        store.add_allocation("a1");
        store.fail_commit("/b1/x");
        let alloc = Allocation::new("a1");

        assert!(store
            .commit_metadata(&alloc, "/b1/x", CommitOperation::Upload)
            .await
            .is_err());
        assert!(store.committed().is_empty());
        assert_eq!(store.commit_count(), 1);
    }
}
