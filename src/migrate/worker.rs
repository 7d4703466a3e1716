//! Per-object transfer protocol
//!
//! One worker handles one [`TransferItem`] through five sequential steps:
//! stale-copy cleanup, source open, streamed upload, metadata commit and source
//! removal. Only the first three can abort the item.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::report::TransferOutcome;
use super::resume::TransferItem;
use crate::config::MigrationConfig;
use crate::destination::{Allocation, CommitOperation, ContentStore, UploadOptions};
use crate::error::MigrateError;
use crate::source::ObjectSource;

/// Everything a worker needs, cloned into each task
#[derive(Clone)]
pub struct TransferWorker {
    source: Arc<dyn ObjectSource>,
    store: Arc<dyn ContentStore>,
    allocation: Allocation,
    config: MigrationConfig,
    options: UploadOptions,
}

impl TransferWorker {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        store: Arc<dyn ContentStore>,
        allocation: Allocation,
        config: MigrationConfig,
        options: UploadOptions,
    ) -> Self {
        Self {
            source,
            store,
            allocation,
            config,
            options,
        }
    }

    /// Run every step for `item` and report where it ended
    pub async fn transfer(self, item: TransferItem) -> TransferOutcome {
        let path = item.destination_path.clone();
        match self.run_steps(&item).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(path = %path, category = error.category(), error = %error, "transfer aborted");
                TransferOutcome::Failed { path, error }
            }
        }
    }

    async fn run_steps(&self, item: &TransferItem) -> Result<TransferOutcome, MigrateError> {
        let object = &item.object;
        let path = item.destination_path.as_str();

        if item.needs_cleanup {
            match self.store.delete_file(&self.allocation, path).await {
                Ok(()) => debug!(path, "removed incomplete copy"),
                Err(e) if e.is_not_found() => debug!(path, "incomplete copy already gone"),
                Err(e) => {
                    return Err(MigrateError::Delete {
                        target: path.to_string(),
                        message: format!("removing incomplete copy: {}", e),
                    })
                }
            }
        }

        let opened = self
            .source
            .open_object(&object.container, &object.key)
            .await
            .map_err(|e| MigrateError::Transfer {
                path: path.to_string(),
                message: format!("opening source object: {}", e),
            })?;

        let bytes = opened.size;
        self.store
            .upload_stream(
                &self.allocation,
                path,
                opened.reader,
                opened.size,
                &opened.content_type,
                self.options,
            )
            .await
            .map_err(|e| MigrateError::Transfer {
                path: path.to_string(),
                message: format!("uploading: {}", e),
            })?;

        info!(path, bytes, replaced = item.needs_cleanup, "uploaded");

        let mut commit_failed = false;
        if self.config.commit {
            if let Err(e) = self
                .store
                .commit_metadata(&self.allocation, path, CommitOperation::Upload)
                .await
            {
                let error = MigrateError::Commit {
                    path: path.to_string(),
                    message: e.to_string(),
                };
                warn!(path, error = %error, "metadata commit failed, upload kept");
                commit_failed = true;
            }
        }

        let mut source_delete_failed = false;
        if self.config.delete_source {
            match self.source.delete_object(&object.container, &object.key).await {
                Ok(()) => debug!(container = %object.container, key = %object.key, "source object removed"),
                Err(e) => {
                    let error = MigrateError::Delete {
                        target: format!("{}/{}", object.container, object.key),
                        message: e.to_string(),
                    };
                    warn!(error = %error, "failed to delete source object");
                    source_delete_failed = true;
                }
            }
        }

        Ok(TransferOutcome::Uploaded {
            path: path.to_string(),
            bytes,
            replaced_incomplete: item.needs_cleanup,
            commit_failed,
            source_delete_failed,
        })
    }
}
