//! Bookkeeping of the folders processed during one run.
//!
//! The coordinator drives folders strictly one after another, so the ledger is
//! plain owned state rather than something shared between workers. It exists
//! for the lifetime of a run and is turned into a [`RunSummary`] at the end.
//!
//! The main components are:
//! - `RunLedger`: collects every `FolderOutcome` in processing order and logs
//!   a one-line verdict for each.
//! - `RunLedger::finish`: freezes the ledger into the summary sent to the
//!   administrators.

use chrono::{DateTime, Utc};
use common::jobs::{FolderOutcome, RunSummary};

use crate::logging::ActivityLog;

pub struct RunLedger {
    started_at: DateTime<Utc>,
    /// Outcomes in the order the folders were processed.
    outcomes: Vec<FolderOutcome>,
    log: ActivityLog,
}

impl RunLedger {
    pub fn new(log: ActivityLog) -> Self {
        Self {
            started_at: Utc::now(),
            outcomes: Vec::new(),
            log,
        }
    }

    /// Takes ownership of a finished outcome.
    ///
    /// A folder that had nothing to build is still recorded: it was eligible
    /// when the run started and the summary should say what happened to it.
    pub fn record(&mut self, outcome: FolderOutcome) {
        match &outcome.error {
            Some(error) => self.log.error(format!(
                "Folder {} finished with error at stage {:?}: {error}",
                outcome.folder_id, outcome.stage
            )),
            None if outcome.had_no_work() => self
                .log
                .summary(format!("Folder {} had no new images", outcome.folder_id)),
            None => self.log.summary(format!(
                "Successfully completed processing for folder: {}",
                outcome.folder_id
            )),
        }
        self.outcomes.push(outcome);
    }

    pub fn finish(self) -> RunSummary {
        let finished_at = Utc::now();
        let seconds = (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.log.summary(format!(
            "Run finished in {seconds:.2} seconds: {} folders recorded",
            self.outcomes.len()
        ));
        RunSummary {
            started_at: self.started_at,
            finished_at,
            outcomes: self.outcomes,
        }
    }
}
