use crate::model::lock::LockStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only health report produced by the `diagnostics` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    pub healthy: bool,
    pub configuration: ConfigurationStatus,
    pub folders: Vec<FolderStatus>,
    pub directories: Vec<DirectoryCheck>,
    pub disk_usage: Vec<DiskUsage>,
    pub lock: LockStatus,
    /// Human readable list of everything that made the report unhealthy.
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationStatus {
    pub valid: bool,
    /// Load failure, if the configuration could not be read at all.
    pub load_error: Option<String>,
    pub violations: Vec<String>,
    pub folder_count: usize,
    pub entry_count: usize,
    pub document_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderStatus {
    pub folder: String,
    pub document: String,
    pub folder_exists: bool,
    pub image_count: usize,
    /// Rendered documents for this folder still in the output area from the
    /// last 24 hours.
    pub recent_documents: usize,
    /// Time of the newest archive batch for this folder.
    pub last_archived: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryCheck {
    pub path: String,
    pub exists: bool,
    pub readable: bool,
    pub writable: bool,
}

impl DirectoryCheck {
    pub fn is_valid(&self) -> bool {
        self.exists && self.readable && self.writable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsage {
    pub name: String,
    pub exists: bool,
    pub total_bytes: u64,
    pub file_count: usize,
}
