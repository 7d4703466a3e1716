//! Per-item outcomes and the run summary

use std::fmt;
use std::time::Duration;

use crate::error::MigrateError;

/// Terminal state of one transfer item
#[derive(Debug)]
pub enum TransferOutcome {
    /// The object is stored at the destination
    Uploaded {
        path: String,
        bytes: u64,
        /// A stale copy was removed first
        replaced_incomplete: bool,
        /// The metadata commit was attempted and failed
        commit_failed: bool,
        /// The source object could not be removed
        source_delete_failed: bool,
    },

    /// The item was abandoned; siblings are unaffected
    Failed { path: String, error: MigrateError },
}

impl TransferOutcome {
    pub fn path(&self) -> &str {
        match self {
            TransferOutcome::Uploaded { path, .. } | TransferOutcome::Failed { path, .. } => path,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Uploaded { .. })
    }
}

/// Aggregated counters for one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub containers_scanned: usize,
    pub objects_listed: u64,
    pub directory_markers: u64,
    pub skipped: u64,
    pub incomplete_retried: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub commit_failures: u64,
    pub source_delete_failures: u64,
    pub bytes_uploaded: u64,
    pub peak_in_flight: usize,
    pub duration: Duration,
}

impl MigrationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one worker outcome into the counters
    pub fn record(&mut self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Uploaded {
                bytes,
                replaced_incomplete,
                commit_failed,
                source_delete_failed,
                ..
            } => {
                self.uploaded += 1;
                self.bytes_uploaded += bytes;
                if *replaced_incomplete {
                    self.incomplete_retried += 1;
                }
                if *commit_failed {
                    self.commit_failures += 1;
                }
                if *source_delete_failed {
                    self.source_delete_failures += 1;
                }
            }
            TransferOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Items handed to the dispatcher
    pub fn dispatched(&self) -> u64 {
        self.uploaded + self.failed
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded ({} bytes, {} replaced), {} skipped, {} failed, {} markers ignored in {:.1}s",
            self.uploaded,
            self.bytes_uploaded,
            self.incomplete_retried,
            self.skipped,
            self.failed,
            self.directory_markers,
            self.duration.as_secs_f64()
        )
    }
}
