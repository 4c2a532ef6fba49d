//! Per-folder and per-run processing records.
//!
//! A `FolderOutcome` is created when a folder enters the pipeline, updated in
//! place as each stage completes and frozen once the pipeline hands it back.
//! Outcomes are aggregated into a `RunSummary` for the administrator summary
//! and the log; neither is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stages of the per-folder state machine, in the only order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Start,
    Built,
    SizeValidated,
    Dispatched,
    Archived,
    SkippedArchive,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderOutcome {
    pub folder_id: String,
    pub document_name: Option<String>,
    /// Last stage the folder reached before the pipeline stopped.
    pub stage: PipelineStage,
    pub document_built: bool,
    pub dispatch_succeeded: bool,
    pub archived: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub document_path: Option<PathBuf>,
    /// Recipient entries attempted and how many of them went through.
    pub entries_attempted: usize,
    pub entries_succeeded: usize,
}

impl FolderOutcome {
    pub fn start(folder_id: &str) -> Self {
        Self {
            folder_id: folder_id.to_string(),
            document_name: None,
            stage: PipelineStage::Start,
            document_built: false,
            dispatch_succeeded: false,
            archived: false,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            document_path: None,
            entries_attempted: 0,
            entries_succeeded: 0,
        }
    }

    /// Records a stage failure. The first error wins; later ones are dropped
    /// because they are consequences of it.
    pub fn fail(&mut self, description: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(description.into());
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// A folder with no new images finishes without building anything and
    /// without an error.
    pub fn had_no_work(&self) -> bool {
        !self.document_built && self.error.is_none()
    }
}

/// Aggregate of one run, used for the administrator summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<FolderOutcome>,
}

impl RunSummary {
    pub fn folders_processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn documents_built(&self) -> usize {
        self.outcomes.iter().filter(|o| o.document_built).count()
    }

    pub fn dispatches_succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.dispatch_succeeded).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error.as_deref().map(|e| (o.folder_id.as_str(), e)))
    }

    /// True when every processed folder got its document out.
    pub fn all_dispatched(&self) -> bool {
        self.outcomes.iter().all(|o| o.dispatch_succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_is_kept() {
        let mut outcome = FolderOutcome::start("A");
        outcome.fail("build failed");
        outcome.fail("archive failed");
        assert_eq!(outcome.error.as_deref(), Some("build failed"));
        assert!(!outcome.had_no_work());
    }

    #[test]
    fn summary_counts_each_stage() {
        let mut built = FolderOutcome::start("A");
        built.document_built = true;
        built.dispatch_succeeded = true;
        let mut failed = FolderOutcome::start("B");
        failed.document_built = true;
        failed.fail("dispatch failed for 1 of 2 entries");

        let summary = RunSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes: vec![built.finish(), failed.finish()],
        };
        assert_eq!(summary.folders_processed(), 2);
        assert_eq!(summary.documents_built(), 2);
        assert_eq!(summary.dispatches_succeeded(), 1);
        assert_eq!(summary.errors().count(), 1);
        assert!(!summary.all_dispatched());
    }

    #[test]
    fn stages_serialize_as_snake_case() {
        let json = serde_json::to_string(&PipelineStage::SkippedArchive).unwrap();
        assert_eq!(json, "\"skipped_archive\"");
    }
}
