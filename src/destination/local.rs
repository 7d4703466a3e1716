//! Local filesystem content store
//!
//! Each allocation is a directory `<root>/<id>`. Stored paths map one to one
//! onto files below it. Upload attributes and metadata commits are appended to
//! a JSON lines journal at `<root>/.journal/<id>.jsonl`.

use super::error::{StoreError, StoreResult};
use super::{is_excluded, Allocation, CommitOperation, ContentStore, UploadOptions};
use crate::config::WhoPays;
use crate::source::ObjectReader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

const JOURNAL_DIR: &str = ".journal";

/// One line of the allocation journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub event: JournalEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEvent {
    Upload {
        size: u64,
        content_type: String,
        who_pays: Option<WhoPays>,
    },
    Commit {
        operation: CommitOperation,
    },
}

/// Filesystem-backed [`ContentStore`]
///
/// # Example
///
/// ```no_run
/// use dstore_migrate::destination::{ContentStore, LocalStore, HOUSEKEEPING_EXCLUDES};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = LocalStore::new("/srv/dstore");
///     let allocation = store.resolve_allocation("my-allocation").await?;
///     let files = store.list_all_files(&allocation, HOUSEKEEPING_EXCLUDES).await?;
///     println!("{} files stored", files.len());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    journal_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            journal_lock: Mutex::new(()),
        }
    }

    fn allocation_dir(&self, allocation: &Allocation) -> PathBuf {
        self.root.join(&allocation.id)
    }

    fn journal_path(&self, allocation: &Allocation) -> PathBuf {
        self.root
            .join(JOURNAL_DIR)
            .join(format!("{}.jsonl", allocation.id))
    }

    /// Map a `/`-rooted store path onto the allocation directory
    fn resolve_path(&self, allocation: &Allocation, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.as_os_str().is_empty() {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "empty path".to_string(),
            });
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "path must stay inside the allocation".to_string(),
            });
        }

        // Paths the filesystem would rewrite (`a//b`, `c/./d`, `dir/`) would be
        // listed back under a different name
        let trimmed = path.trim_start_matches('/');
        let rebuilt = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rebuilt != trimmed {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "path is not in normal form".to_string(),
            });
        }

        Ok(self.allocation_dir(allocation).join(relative))
    }

    /// Read back every journal entry of an allocation
    pub async fn journal(&self, allocation: &Allocation) -> StoreResult<Vec<JournalEntry>> {
        let contents = match fs::read_to_string(self.journal_path(allocation)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }

    async fn append_journal(
        &self,
        allocation: &Allocation,
        path: &str,
        event: JournalEvent,
    ) -> StoreResult<()> {
        let entry = JournalEntry {
            timestamp: Utc::now(),
            path: path.to_string(),
            event,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let journal = self.journal_path(allocation);
        let _guard = self.journal_lock.lock().await;
        if let Some(parent) = journal.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Walk `dir`, collecting file sizes keyed by store path
    fn walk<'a>(
        &'a self,
        dir: PathBuf,
        base: &'a Path,
        exclude: &'a [&'a str],
        files: &'a mut HashMap<String, u64>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = fs::read_dir(&dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                let relative = entry_path.strip_prefix(base).unwrap_or(&entry_path);
                let store_path = format!(
                    "/{}",
                    relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/")
                );

                if is_excluded(&store_path, exclude) {
                    continue;
                }

                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    self.walk(entry_path, base, exclude, files).await?;
                } else if metadata.is_file() {
                    files.insert(store_path, metadata.len());
                }
            }

            Ok(())
        })
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    async fn resolve_allocation(&self, id: &str) -> StoreResult<Allocation> {
        let allocation = Allocation::new(id);
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(StoreError::AllocationNotFound(id.to_string()));
        }

        match fs::metadata(self.allocation_dir(&allocation)).await {
            Ok(meta) if meta.is_dir() => Ok(allocation),
            Ok(_) => Err(StoreError::AllocationNotFound(id.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::AllocationNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_all_files(
        &self,
        allocation: &Allocation,
        exclude: &[&str],
    ) -> StoreResult<HashMap<String, u64>> {
        let base = self.allocation_dir(allocation);
        let mut files = HashMap::new();
        self.walk(base.clone(), &base, exclude, &mut files).await?;
        Ok(files)
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
        if options.encrypt {
            return Err(StoreError::Unsupported {
                store: self.store_name().to_string(),
                operation: "encrypted upload".to_string(),
            });
        }

        let target = self.resolve_path(allocation, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = fs::File::create(&target).await?;
        let mut writer = BufWriter::new(file);
        let written = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        // A short file stays behind; the next run sees its size and replaces it
        if written != size {
            return Err(StoreError::SizeMismatch {
                path: path.to_string(),
                expected: size,
                actual: written,
            });
        }

        self.append_journal(
            allocation,
            path,
            JournalEvent::Upload {
                size,
                content_type: content_type.to_string(),
                who_pays: options.who_pays,
            },
        )
        .await
    }

    async fn delete_file(&self, allocation: &Allocation, path: &str) -> StoreResult<()> {
        let target = self.resolve_path(allocation, path)?;
        fs::remove_file(&target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.to_string())
            } else {
                StoreError::from(e)
            }
        })
    }

    async fn commit_metadata(
        &self,
        allocation: &Allocation,
        path: &str,
        operation: CommitOperation,
    ) -> StoreResult<()> {
        let target = self.resolve_path(allocation, path)?;
        if operation != CommitOperation::Delete && fs::metadata(&target).await.is_err() {
            return Err(StoreError::CommitFailed {
                path: path.to_string(),
                message: "no stored file to commit".to_string(),
            });
        }

        self.append_journal(allocation, path, JournalEvent::Commit { operation })
            .await
    }

    fn store_name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::HOUSEKEEPING_EXCLUDES;
    use std::io::Cursor;
    use tempfile::TempDir;

    async fn store_with_allocation(id: &str) -> (TempDir, LocalStore, Allocation) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(id)).await.unwrap();
        let store = LocalStore::new(temp.path());
        let allocation = store.resolve_allocation(id).await.unwrap();
        (temp, store, allocation)
    }

    fn reader(data: &'static [u8]) -> ObjectReader {
        Box::new(Cursor::new(data))
    }

    #[tokio::test]
    async fn test_missing_allocation() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path());
        let err = store.resolve_allocation("absent").await.unwrap_err();
        assert!(matches!(err, StoreError::AllocationNotFound(_)));
    }

    #[tokio::test]
    async fn test_allocation_id_cannot_escape_root() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path());
        assert!(store.resolve_allocation("../etc").await.is_err());
        assert!(store.resolve_allocation(JOURNAL_DIR).await.is_err());
    }

    #[tokio::test]
    async fn test_upload_and_list() {
        let (_temp, store, alloc) = store_with_allocation("a1").await;

        store
            .upload_stream(&alloc, "/b1/dir/a.txt", reader(b"hello"), 5, "text/plain", UploadOptions::default())
            .await
            .unwrap();

        let files = store.list_all_files(&alloc, HOUSEKEEPING_EXCLUDES).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("/b1/dir/a.txt"), Some(&5));
    }

    #[tokio::test]
    async fn test_listing_excludes_housekeeping() {
        let (temp, store, alloc) = store_with_allocation("a1").await;
        let dir = temp.path().join("a1");
        fs::create_dir_all(dir.join("b1/.git")).await.unwrap();
        fs::write(dir.join("b1/.git/HEAD"), b"ref").await.unwrap();
        fs::write(dir.join("b1/.DS_Store"), b"junk").await.unwrap();
        fs::write(dir.join("b1/keep.bin"), b"data").await.unwrap();

        let files = store.list_all_files(&alloc, HOUSEKEEPING_EXCLUDES).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("/b1/keep.bin"), Some(&4));
    }

    #[tokio::test]
    async fn test_short_stream_leaves_partial_file() {
        let (_temp, store, alloc) = store_with_allocation("a1").await;

        let err = store
            .upload_stream(&alloc, "/b1/x", reader(b"abc"), 8, "text/plain", UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { expected: 8, actual: 3, .. }));

        let files = store.list_all_files(&alloc, HOUSEKEEPING_EXCLUDES).await.unwrap();
        assert_eq!(files.get("/b1/x"), Some(&3));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_temp, store, alloc) = store_with_allocation("a1").await;
        let err = store
            .upload_stream(&alloc, "/b1/../../x", reader(b"a"), 1, "text/plain", UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_non_normal_paths_rejected() {
        let (_temp, store, alloc) = store_with_allocation("a1").await;

        for path in ["/b1/a//b", "/b1/c/./d", "/b1/dir/"] {
            let err = store
                .upload_stream(&alloc, path, reader(b"a"), 1, "text/plain", UploadOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidPath { .. }), "{} accepted", path);
        }

        let files = store.list_all_files(&alloc, HOUSEKEEPING_EXCLUDES).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_encrypted_upload_unsupported() {
        let (_temp, store, alloc) = store_with_allocation("a1").await;
        let options = UploadOptions {
            encrypt: true,
            who_pays: None,
        };
        let err = store
            .upload_stream(&alloc, "/b1/x", reader(b"a"), 1, "text/plain", options)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { .. }));
        assert!(!store.supports_encryption());
    }

    #[tokio::test]
    async fn test_delete_file() {
        let (_temp, store, alloc) = store_with_allocation("a1").await;
        store
            .upload_stream(&alloc, "/b1/x", reader(b"a"), 1, "text/plain", UploadOptions::default())
            .await
            .unwrap();

        store.delete_file(&alloc, "/b1/x").await.unwrap();
        let err = store.delete_file(&alloc, "/b1/x").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_journal_records_upload_and_commit() {
        let (_temp, store, alloc) = store_with_allocation("a1").await;
        let options = UploadOptions {
            encrypt: false,
            who_pays: Some(WhoPays::Owner),
        };
        store
            .upload_stream(&alloc, "/b1/x", reader(b"abc"), 3, "text/plain", options)
            .await
            .unwrap();
        store
            .commit_metadata(&alloc, "/b1/x", CommitOperation::Upload)
            .await
            .unwrap();

        let journal = store.journal(&alloc).await.unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(
            journal[0].event,
            JournalEvent::Upload {
                size: 3,
                content_type: "text/plain".to_string(),
                who_pays: Some(WhoPays::Owner),
            }
        );
        assert_eq!(
            journal[1].event,
            JournalEvent::Commit {
                operation: CommitOperation::Upload
            }
        );
    }

    #[tokio::test]
    async fn test_commit_without_file_fails() {
        let (_temp, store, alloc) = store_with_allocation("a1").await;
        let err = store
            .commit_metadata(&alloc, "/b1/missing", CommitOperation::Upload)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CommitFailed { .. }));
    }
}
