//! Read-only health report for the `diagnostics` command.
//!
//! Nothing here takes the run lock or modifies storage, apart from a probe
//! file created and removed again to test directory writability.

use chrono::{DateTime, Utc};
use common::model::diagnostics::{
    ConfigurationStatus, DiagnosticsReport, DirectoryCheck, DiskUsage, FolderStatus,
};
use common::model::lock::LockStatus;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use crate::config::{validate, ConfigSnapshot, ConfigStore};
use crate::job_controller::lock::RunLock;
use crate::logging::ActivityLog;
use crate::paths::Layout;
use crate::services::documents::clean_filename;
use crate::services::documents::sources::list_images;

const RECENT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
/// Lock timeout assumed when the configuration cannot be loaded.
const DEFAULT_LOCK_TIMEOUT_MINUTES: u32 = 60;
const PROBE_FILE: &str = ".bimailer_write_probe";

pub struct Diagnostics<'a> {
    layout: &'a Layout,
    log: ActivityLog,
}

impl<'a> Diagnostics<'a> {
    pub fn new(layout: &'a Layout, log: ActivityLog) -> Self {
        Self { layout, log }
    }

    pub fn run(&self) -> DiagnosticsReport {
        self.run_at(SystemTime::now())
    }

    pub fn run_at(&self, now: SystemTime) -> DiagnosticsReport {
        self.log.summary("Running system diagnostics");

        let store = ConfigStore::new(self.layout.config_dir(), self.log.scoped("config"));
        let (configuration, snapshot) = match store.load_unchecked() {
            Ok(snapshot) => (configuration_status(&snapshot), Some(snapshot)),
            Err(err) => (
                ConfigurationStatus {
                    load_error: Some(err.to_string()),
                    ..ConfigurationStatus::default()
                },
                None,
            ),
        };

        let folders = match &snapshot {
            Some(snapshot) => self.folder_statuses(snapshot, now),
            None => Vec::new(),
        };

        let directories: Vec<_> = [
            self.layout.input_dir(),
            self.layout.output_dir(),
            self.layout.archive_dir(),
            self.layout.image_archive_dir(),
            self.layout.document_archive_dir(),
        ]
        .iter()
        .map(|dir| check_directory(dir))
        .collect();

        let disk_usage = vec![
            disk_usage("Input", &self.layout.input_dir()),
            disk_usage("Output", &self.layout.output_dir()),
            disk_usage("Archive", &self.layout.archive_dir()),
        ];

        let timeout = snapshot
            .as_ref()
            .map_or(DEFAULT_LOCK_TIMEOUT_MINUTES, ConfigSnapshot::lock_timeout_minutes);
        let lock = RunLock::new(self.layout.lock_file(), timeout, self.log.scoped("lock"))
            .status_at(DateTime::<Utc>::from(now));

        let mut issues = Vec::new();
        if let Some(err) = &configuration.load_error {
            issues.push(format!("Configuration could not be loaded: {err}"));
        }
        issues.extend(
            configuration
                .violations
                .iter()
                .map(|v| format!("Configuration: {v}")),
        );
        issues.extend(
            directories
                .iter()
                .filter(|d| !d.is_valid())
                .map(|d| format!("Invalid permissions for: {}", d.path)),
        );

        let healthy = configuration.valid && directories.iter().all(DirectoryCheck::is_valid);
        if healthy {
            self.log
                .summary("System diagnostics completed - no issues found");
        } else {
            self.log.error(format!(
                "System diagnostics found issues: {}",
                issues.join("; ")
            ));
        }

        DiagnosticsReport {
            generated_at: DateTime::<Utc>::from(now),
            healthy,
            configuration,
            folders,
            directories,
            disk_usage,
            lock,
            issues,
        }
    }

    fn folder_statuses(&self, snapshot: &ConfigSnapshot, now: SystemTime) -> Vec<FolderStatus> {
        let extensions = &snapshot.settings.processing.image_extensions;
        snapshot
            .processing_folders()
            .map(|folder| {
                let document = snapshot.document_for(folder).unwrap_or_default();
                let dir = self.layout.folder_dir(folder);
                FolderStatus {
                    folder: folder.to_string(),
                    document: document.to_string(),
                    folder_exists: dir.is_dir(),
                    image_count: list_images(&dir, extensions)
                        .map(|images| images.len())
                        .unwrap_or(0),
                    recent_documents: self.recent_documents(document, now),
                    last_archived: self.last_archived(folder),
                }
            })
            .collect()
    }

    /// Rendered documents for `document` in the output area, modified within
    /// the last 24 hours.
    fn recent_documents(&self, document: &str, now: SystemTime) -> usize {
        let stem = clean_filename(document);
        let Ok(entries) = fs::read_dir(self.layout.output_dir()) else {
            return 0;
        };
        let since = now.checked_sub(RECENT_WINDOW).unwrap_or(SystemTime::UNIX_EPOCH);
        entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.ends_with(".pdf") && name.contains(&stem)
            })
            .filter(|entry| {
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .is_ok_and(|modified| modified >= since)
            })
            .count()
    }

    /// Modification time of the newest image batch archived for `folder`.
    fn last_archived(&self, folder: &str) -> Option<DateTime<Utc>> {
        let prefix = format!("{folder}_");
        WalkDir::new(self.layout.image_archive_dir())
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .filter_map(|entry| entry.metadata().ok()?.modified().ok())
            .max()
            .map(DateTime::<Utc>::from)
    }
}

fn configuration_status(snapshot: &ConfigSnapshot) -> ConfigurationStatus {
    let violations: Vec<String> = validate(snapshot).iter().map(ToString::to_string).collect();
    let documents: std::collections::BTreeSet<_> = snapshot.folder_to_document.values().collect();
    ConfigurationStatus {
        valid: violations.is_empty(),
        load_error: None,
        violations,
        folder_count: snapshot.folder_to_document.len(),
        entry_count: snapshot.entries.len(),
        document_count: documents.len(),
    }
}

fn check_directory(dir: &Path) -> DirectoryCheck {
    let exists = dir.is_dir();
    let readable = exists && fs::read_dir(dir).is_ok();
    let writable = exists && is_writable(dir);
    DirectoryCheck {
        path: dir.display().to_string(),
        exists,
        readable,
        writable,
    }
}

fn is_writable(dir: &Path) -> bool {
    let read_only = fs::metadata(dir)
        .map(|m| m.permissions().readonly())
        .unwrap_or(true);
    if read_only {
        return false;
    }
    let probe = dir.join(PROBE_FILE);
    match fs::write(&probe, b"") {
        Ok(()) => fs::remove_file(&probe).is_ok(),
        Err(_) => false,
    }
}

fn disk_usage(name: &str, dir: &Path) -> DiskUsage {
    let mut usage = DiskUsage {
        name: name.to_string(),
        exists: dir.is_dir(),
        total_bytes: 0,
        file_count: 0,
    };
    if !usage.exists {
        return usage;
    }
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file() {
            usage.file_count += 1;
            usage.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    usage
}

/// Plain text rendering of a report.
pub fn render_text(report: &DiagnosticsReport) -> String {
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    let mut out = String::from("=== BIMailer System Diagnostics ===\n");
    let _ = writeln!(out, "Timestamp: {}", report.generated_at.to_rfc3339());
    let _ = writeln!(
        out,
        "System Status: {}",
        if report.healthy { "healthy" } else { "issues_found" }
    );

    let config = &report.configuration;
    let _ = writeln!(
        out,
        "\nConfiguration: {} ({} folders, {} documents, {} mailing entries)",
        if config.valid { "valid" } else { "invalid" },
        config.folder_count,
        config.document_count,
        config.entry_count
    );

    if !report.folders.is_empty() {
        out.push_str("\nFolders:\n");
        for folder in &report.folders {
            let last = folder
                .last_archived
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            let _ = writeln!(
                out,
                "  - {} -> {}: exists {}, {} images, {} recent documents, last archived {}",
                folder.folder,
                folder.document,
                yes_no(folder.folder_exists),
                folder.image_count,
                folder.recent_documents,
                last
            );
        }
    }

    out.push_str("\nDirectories:\n");
    for dir in &report.directories {
        let _ = writeln!(
            out,
            "  - {}: exists {}, readable {}, writable {}",
            dir.path,
            yes_no(dir.exists),
            yes_no(dir.readable),
            yes_no(dir.writable)
        );
    }

    out.push_str("\nDisk usage:\n");
    for usage in &report.disk_usage {
        let _ = writeln!(
            out,
            "  - {}: {:.2} MB in {} files",
            usage.name,
            usage.total_bytes as f64 / (1024.0 * 1024.0),
            usage.file_count
        );
    }

    let lock = match &report.lock {
        LockStatus::Free => "free".to_string(),
        LockStatus::Held { marker } => format!(
            "held by process {} since {}",
            marker.owner_id,
            marker.acquired_at.to_rfc3339()
        ),
        LockStatus::Stale { marker } => format!(
            "stale (process {} since {})",
            marker.owner_id,
            marker.acquired_at.to_rfc3339()
        ),
        LockStatus::Corrupt => "corrupt marker".to_string(),
    };
    let _ = writeln!(out, "\nLock: {lock}");

    if !report.issues.is_empty() {
        out.push_str("\nCritical Issues Found:\n");
        for issue in &report.issues {
            let _ = writeln!(out, "  - {issue}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::write_config;
    use tempfile::TempDir;

    const FOLDERS: &str = "FolderName,PDFName\nA,Report-A\nALL,Global Headers\n";
    const MAILING: &str = "PDFName,Recipients,Subject\nReport-A,a@example.com,Weekly\n";

    fn layout(dir: &TempDir) -> Layout {
        let layout = Layout::new(dir.path());
        write_config(layout.config_dir(), FOLDERS, MAILING);
        fs::create_dir_all(layout.input_dir()).unwrap();
        layout.ensure_runtime_dirs().unwrap();
        layout
    }

    #[test]
    fn healthy_tree_reports_folder_state() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        fs::create_dir_all(layout.folder_dir("A")).unwrap();
        fs::write(layout.folder_dir("A").join("1.png"), b"png").unwrap();
        fs::write(layout.folder_dir("A").join("notes.txt"), b"txt").unwrap();
        fs::write(layout.output_dir().join("Report-A_2026-10-18.pdf"), b"%PDF").unwrap();
        let batch = layout.image_archive_dir().join("2026").join("10").join("A_2026-10-17");
        fs::create_dir_all(&batch).unwrap();

        let report = Diagnostics::new(&layout, ActivityLog::new("diagnostics")).run();

        assert!(report.healthy, "issues: {:?}", report.issues);
        assert!(report.configuration.valid);
        assert_eq!(report.configuration.folder_count, 2);
        assert_eq!(report.folders.len(), 1);
        let folder = &report.folders[0];
        assert_eq!(folder.document, "Report-A");
        assert!(folder.folder_exists);
        assert_eq!(folder.image_count, 1);
        assert_eq!(folder.recent_documents, 1);
        assert!(folder.last_archived.is_some());
        assert_eq!(report.lock, LockStatus::Free);
        assert_eq!(report.directories.len(), 5);

        let input = report.disk_usage.iter().find(|u| u.name == "Input").unwrap();
        assert_eq!(input.file_count, 2);
        assert_eq!(input.total_bytes, 6);
        assert!(!layout.input_dir().join(PROBE_FILE).exists());
    }

    #[test]
    fn violations_and_missing_directories_make_report_unhealthy() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        write_config(
            layout.config_dir(),
            "FolderName,PDFName\nA,Report-A\nB,Report-B\n",
            MAILING,
        );

        let report = Diagnostics::new(&layout, ActivityLog::new("diagnostics")).run();

        assert!(!report.healthy);
        assert!(!report.configuration.valid);
        assert_eq!(report.configuration.violations.len(), 1);
        assert!(report.issues.iter().any(|i| i.contains("Report-B")));
        assert!(report.issues.iter().any(|i| i.starts_with("Invalid permissions for:")));
        assert!(report.directories.iter().all(|d| !d.exists));
        let folder_b = report.folders.iter().find(|f| f.folder == "B").unwrap();
        assert!(!folder_b.folder_exists);
        assert_eq!(folder_b.image_count, 0);
    }

    #[test]
    fn unloadable_configuration_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        fs::create_dir_all(layout.input_dir()).unwrap();
        layout.ensure_runtime_dirs().unwrap();

        let report = Diagnostics::new(&layout, ActivityLog::new("diagnostics")).run();

        assert!(!report.healthy);
        assert!(report.configuration.load_error.is_some());
        assert!(report.folders.is_empty());
        let text = render_text(&report);
        assert!(text.contains("System Status: issues_found"));
        assert!(text.contains("Configuration could not be loaded"));
    }

    #[test]
    fn report_serializes_to_json() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let report = Diagnostics::new(&layout, ActivityLog::new("diagnostics")).run();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["healthy"], serde_json::Value::Bool(true));
        assert_eq!(json["lock"]["state"], "free");
    }
}
