//! Migration pipeline
//!
//! [`Migrator::run`] drives one run end to end:
//!
//! 1. Validate configuration and derive upload options
//! 2. Resolve the allocation and snapshot the destination ([`ResumeIndex`])
//! 3. List every container and classify each object ([`Enumerator`])
//! 4. Hand the work list to the [`Dispatcher`], one [`TransferWorker`] per item
//! 5. Fold outcomes into a [`MigrationReport`]
//!
//! Every container is listed before the first transfer starts, so a listing
//! failure aborts the run with nothing uploaded.

mod dispatch;
mod enumerate;
mod report;
mod resume;
mod worker;

pub use dispatch::{DispatchState, DispatchSummary, Dispatcher, Slot};
pub use enumerate::{DescriptorStream, Enumerator};
pub use report::{MigrationReport, TransferOutcome};
pub use resume::{Classification, ResumeIndex, TransferItem};
pub use worker::TransferWorker;

use futures::stream::TryStreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::config::MigrationConfig;
use crate::destination::{ContentStore, UploadOptions};
use crate::error::{MigrateError, Result};
use crate::source::ObjectSource;

/// One configured migration between a source and a destination
pub struct Migrator {
    source: Arc<dyn ObjectSource>,
    store: Arc<dyn ContentStore>,
    config: MigrationConfig,
}

impl Migrator {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        store: Arc<dyn ContentStore>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Upload options for this run, rejecting what the destination cannot honour
    fn upload_options(&self) -> Result<UploadOptions> {
        self.config.validate()?;

        if self.config.encrypt && !self.store.supports_encryption() {
            return Err(MigrateError::Config(format!(
                "destination '{}' does not support encryption",
                self.store.store_name()
            )));
        }

        Ok(UploadOptions {
            encrypt: self.config.encrypt,
            who_pays: self.config.payer()?,
        })
    }

    /// Run the migration to completion
    ///
    /// Returns once every dispatched transfer has finished. Per-item failures
    /// are counted in the report; only configuration, allocation and listing
    /// failures are returned as errors.
    ///
    /// The whole work list is built before the first transfer starts, so memory
    /// grows with the number of objects to transfer across all containers.
    pub async fn run(&self) -> Result<MigrationReport> {
        let started = Instant::now();
        let result = self.execute(started).await;
        if let Err(e) = &result {
            error!(category = e.category(), error = %e, "migration aborted");
        }
        result
    }

    async fn execute(&self, started: Instant) -> Result<MigrationReport> {
        let options = self.upload_options()?;

        info!(
            source = self.source.source_name(),
            destination = self.store.store_name(),
            allocation = %self.config.allocation,
            containers = ?self.config.buckets,
            prefix = %self.config.prefix,
            concurrency = self.config.concurrency,
            delete_source = self.config.delete_source,
            commit = self.config.commit,
            "starting migration"
        );

        let (allocation, index) =
            ResumeIndex::load(self.store.as_ref(), &self.config.allocation).await?;

        let mut report = MigrationReport::new();
        let enumerator = Enumerator::new(self.source.clone());
        let containers = enumerator.containers(&self.config.buckets).await?;

        let mut work = Vec::new();
        for container in &containers {
            let mut objects = enumerator.objects(container, self.config.prefix_filter());
            while let Some(object) = objects.try_next().await? {
                report.objects_listed += 1;
                match index.plan(object) {
                    Some(item) => work.push(item),
                    None => report.skipped += 1,
                }
            }
            report.containers_scanned += 1;
        }
        report.directory_markers = enumerator.directory_markers();
        report.objects_listed += report.directory_markers;

        info!(
            containers = report.containers_scanned,
            listed = report.objects_listed,
            skipped = report.skipped,
            queued = work.len(),
            "enumeration complete"
        );

        let worker = TransferWorker::new(
            self.source.clone(),
            self.store.clone(),
            allocation,
            self.config.clone(),
            options,
        );
        let dispatcher = Dispatcher::new(self.config.concurrency);
        let summary = dispatcher
            .run(work, |item| worker.clone().transfer(item))
            .await;

        for outcome in &summary.outcomes {
            report.record(outcome);
        }
        report.failed += summary.panicked as u64;
        report.peak_in_flight = dispatcher.state().peak();
        report.duration = started.elapsed();

        info!(
            uploaded = report.uploaded,
            skipped = report.skipped,
            failed = report.failed,
            bytes = report.bytes_uploaded,
            peak_in_flight = report.peak_in_flight,
            "migration complete: {}",
            report
        );
        Ok(report)
    }
}
