//! Drives a run: every eligible folder, one at a time, under the run lock.
//!
//! Stage failures stay inside each folder's outcome, and so does a panicking
//! pipeline. Only what happens outside the per-folder boundary (lock
//! acquisition or folder discovery) fails the run and triggers the critical
//! error notification.

use common::jobs::{FolderOutcome, RunSummary};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;

use super::lock::{LockError, RunLock};
use super::state::RunLedger;
use crate::config::ConfigSnapshot;
use crate::logging::ActivityLog;
use crate::paths::Layout;
use crate::services::archive::{prune_stale_files, Archiver};
use crate::services::dispatch::Dispatcher;
use crate::services::documents::sources::list_images;
use crate::services::documents::DocumentBuilder;
use crate::services::notify::AdminNotifier;
use crate::services::pipeline::FolderPipeline;

pub const CRITICAL_ERROR_SUBJECT: &str = "Critical Processing Error";

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("failed to scan folder {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("folder '{0}' not found in configuration")]
    UnknownFolder(String),
}

impl RunError {
    /// Another run holds the lock. Expected under overlap, not a failure of
    /// this run.
    pub fn is_busy(&self) -> bool {
        matches!(self, RunError::Lock(LockError::Busy { .. }))
    }
}

pub struct RunCoordinator {
    snapshot: ConfigSnapshot,
    layout: Layout,
    builder: Box<dyn DocumentBuilder>,
    dispatcher: Dispatcher,
    archiver: Archiver,
    notifier: AdminNotifier,
    lock: RunLock,
    log: ActivityLog,
}

impl RunCoordinator {
    /// `dispatcher` carries the folder documents; `admin_dispatcher` the
    /// administrator notifications.
    pub fn new(
        snapshot: ConfigSnapshot,
        layout: Layout,
        builder: Box<dyn DocumentBuilder>,
        dispatcher: Dispatcher,
        admin_dispatcher: Dispatcher,
        log: ActivityLog,
    ) -> Self {
        let archiver = Archiver::new(
            &layout,
            &snapshot.settings.processing,
            log.scoped("archiver"),
        );
        let notifier = AdminNotifier::new(&snapshot, admin_dispatcher, log.scoped("notify"));
        let lock = RunLock::new(
            layout.lock_file(),
            snapshot.lock_timeout_minutes(),
            log.scoped("lock"),
        )
        .override_existing(snapshot.settings.processing.override_existing_lock);
        Self {
            snapshot,
            layout,
            builder,
            dispatcher,
            archiver,
            notifier,
            lock,
            log,
        }
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    /// Configured folders, global folder excluded, holding at least one image.
    pub fn eligible_folders(&self) -> Result<Vec<String>, RunError> {
        let extensions = &self.snapshot.settings.processing.image_extensions;
        let mut eligible = Vec::new();
        for folder in self.snapshot.processing_folders() {
            let dir = self.layout.folder_dir(folder);
            let images = list_images(&dir, extensions)
                .map_err(|source| RunError::Discovery { path: dir, source })?;
            if !images.is_empty() {
                eligible.push(folder.to_string());
            }
        }
        Ok(eligible)
    }

    /// Full run: lock, every eligible folder, summary, cleanup.
    pub fn run_all(&self) -> Result<RunSummary, RunError> {
        let guard = self.lock.acquire()?;
        self.log.summary("Starting full processing workflow");

        let result = self.process_all();
        self.cleanup(SystemTime::now());

        if let Err(err) = guard.release() {
            self.log.failure("Failed to release run lock", &err);
        }

        match result {
            Ok(summary) => {
                self.log.summary(format!(
                    "BIMailer processing completed: {}/{} folders processed successfully",
                    summary.dispatches_succeeded(),
                    summary.folders_processed()
                ));
                Ok(summary)
            }
            Err(err) => {
                self.log.failure("Critical error during full processing", &err);
                self.notifier
                    .send_error(CRITICAL_ERROR_SUBJECT, &err.to_string());
                Err(err)
            }
        }
    }

    /// One named folder under the lock. No summary and no cleanup.
    pub fn run_folder(&self, folder: &str) -> Result<FolderOutcome, RunError> {
        if !self.snapshot.processing_folders().any(|f| f == folder) {
            let err = RunError::UnknownFolder(folder.to_string());
            self.log.error(&err);
            return Err(err);
        }

        let guard = self.lock.acquire()?;
        self.log
            .summary(format!("Processing specific folder: {folder}"));
        let outcome = self.process_guarded(folder);
        if let Err(err) = guard.release() {
            self.log.failure("Failed to release run lock", &err);
        }

        if let Some(error) = &outcome.error {
            self.notifier.send_error(
                &format!("BIMailer Processing Error - {folder}"),
                &format!("Error processing folder {folder}: {error}"),
            );
        }
        Ok(outcome)
    }

    fn process_all(&self) -> Result<RunSummary, RunError> {
        let mut ledger = RunLedger::new(self.log.clone());
        let folders = self.eligible_folders()?;
        if folders.is_empty() {
            self.log
                .summary("No folders with images found for processing");
            return Ok(ledger.finish());
        }
        self.log.summary(format!(
            "Found {} folders to process: {}",
            folders.len(),
            folders.join(", ")
        ));

        for folder in &folders {
            ledger.record(self.process_guarded(folder));
        }

        let summary = ledger.finish();
        if self.notifier.send_summary(&summary) {
            self.log.email("Admin summary handled");
        } else {
            self.log.error("Failed to send admin summary email");
        }
        Ok(summary)
    }

    /// Runs the pipeline for one folder. A panic ends that folder only and is
    /// recorded as its error.
    fn process_guarded(&self, folder: &str) -> FolderOutcome {
        let pipeline = FolderPipeline::new(
            &self.snapshot,
            &self.layout,
            self.builder.as_ref(),
            &self.dispatcher,
            &self.archiver,
            self.log.scoped("pipeline"),
        );
        panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(folder))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            self.log
                .error(format!("Processing of folder {folder} panicked: {message}"));
            let mut outcome = FolderOutcome::start(folder);
            outcome.document_name = self.snapshot.document_for(folder).map(str::to_string);
            outcome.fail(format!("processing exception: {message}"));
            outcome.finish()
        })
    }

    /// Retention sweep of the archive, then stale documents in the output
    /// area and old log files. Failures are logged and never fail the run.
    fn cleanup(&self, now: SystemTime) {
        self.log.file_op("Starting cleanup tasks");
        let general = &self.snapshot.settings.general;

        let swept = self.archiver.sweep_retention(self.snapshot.retention_days(), now);
        let documents = prune_stale_files(
            &self.layout.output_dir(),
            general.output_retention_days,
            now,
            &["pdf", "json"],
            &self.log,
        );
        let logs = prune_stale_files(
            &self.layout.logs_dir(),
            general.log_retention_days,
            now,
            &[crate::logging::LOG_FILE_EXTENSION],
            &self.log,
        );

        self.log.file_op(format!(
            "Cleanup tasks completed: {} archived files, {} rendered files, {} log files removed",
            swept.files_removed, documents, logs
        ));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
