//! Binary-level error type. Component errors live next to their components and
//! are folded in here only at the command boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::job_controller::coordinator::RunError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("failed to prepare directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown command `{0}` (expected run, diagnostics or folder:<name>)")]
    UnknownCommand(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to install interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),
}

impl AppError {
    /// Another run holds the lock.
    pub fn is_busy(&self) -> bool {
        matches!(self, AppError::Run(err) if err.is_busy())
    }
}
