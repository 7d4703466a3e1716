//! Resume detection against destination state
//!
//! The destination is listed once per run. Each source descriptor is then
//! classified by comparing sizes at its destination path.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::destination::{Allocation, ContentStore, StoreError, HOUSEKEEPING_EXCLUDES};
use crate::error::{MigrateError, Result};
use crate::source::ObjectDescriptor;

/// How one source object relates to what the destination already holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Same size already stored
    Skip,
    /// A copy with a different size exists and must be removed first
    RetryIncomplete { stored_size: u64 },
    /// Nothing stored at the path
    New,
}

/// One unit of work for a transfer worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub object: ObjectDescriptor,
    pub destination_path: String,
    pub needs_cleanup: bool,
}

/// Snapshot of destination paths and sizes
#[derive(Debug, Clone, Default)]
pub struct ResumeIndex {
    existing: HashMap<String, u64>,
}

impl ResumeIndex {
    pub fn new(existing: HashMap<String, u64>) -> Self {
        Self { existing }
    }

    /// Resolve the allocation and snapshot its contents
    ///
    /// Both steps are run-fatal on failure.
    pub async fn load(store: &dyn ContentStore, allocation_id: &str) -> Result<(Allocation, Self)> {
        let allocation = store
            .resolve_allocation(allocation_id)
            .await
            .map_err(|e| match e {
                StoreError::AllocationNotFound(id) => {
                    MigrateError::Allocation(format!("allocation '{}' not found", id))
                }
                other => MigrateError::Allocation(format!(
                    "error fetching allocation '{}': {}",
                    allocation_id, other
                )),
            })?;

        let existing = store
            .list_all_files(&allocation, HOUSEKEEPING_EXCLUDES)
            .await
            .map_err(|e| {
                MigrateError::Allocation(format!(
                    "error listing files of allocation '{}': {}",
                    allocation_id, e
                ))
            })?;

        info!(
            store = store.store_name(),
            allocation = %allocation.id,
            files = existing.len(),
            "loaded destination state"
        );
        Ok((allocation, Self::new(existing)))
    }

    pub fn len(&self) -> usize {
        self.existing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.existing.is_empty()
    }

    pub fn classify(&self, object: &ObjectDescriptor) -> Classification {
        match self.existing.get(&object.destination_path()) {
            Some(&stored) if stored == object.size => Classification::Skip,
            Some(&stored) => Classification::RetryIncomplete { stored_size: stored },
            None => Classification::New,
        }
    }

    /// Build the transfer item for `object`, or `None` when it is already migrated
    pub fn plan(&self, object: ObjectDescriptor) -> Option<TransferItem> {
        let destination_path = object.destination_path();
        let needs_cleanup = match self.classify(&object) {
            Classification::Skip => {
                debug!(path = %destination_path, "already migrated, skipping");
                return None;
            }
            Classification::RetryIncomplete { stored_size } => {
                debug!(
                    path = %destination_path,
                    stored_size,
                    source_size = object.size,
                    "incomplete copy found, will replace"
                );
                true
            }
            Classification::New => false,
        };

        Some(TransferItem {
            object,
            destination_path,
            needs_cleanup,
        })
    }
}
