//! Dated archive storage and retention.
//!
//! Sent documents and the images they were built from move out of the working
//! areas into `images/<year>/<month>/<folder>_<timestamp>/` and
//! `documents/<year>/<month>/<stem>_sent_<timestamp>.pdf`. Anything in the
//! archive older than the retention period is swept away later.

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::settings::ProcessingSettings;
use crate::logging::ActivityLog;
use crate::paths::Layout;
use crate::services::documents::metadata::sidecar_path;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move {from} to {to}: {message}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },
    #[error("archived {moved} of {total} images of {folder}")]
    Partial {
        folder: String,
        moved: usize,
        total: usize,
    },
    #[error("document {0} does not exist")]
    MissingDocument(PathBuf),
    #[error("metadata sidecar {0} does not exist")]
    MissingSidecar(PathBuf),
}

/// What a retention sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepCounts {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub failures: usize,
}

pub struct Archiver {
    archive_root: PathBuf,
    image_root: PathBuf,
    document_root: PathBuf,
    enabled: bool,
    timestamp_format: String,
    log: ActivityLog,
}

impl Archiver {
    pub fn new(layout: &Layout, processing: &ProcessingSettings, log: ActivityLog) -> Self {
        Self {
            archive_root: layout.archive_dir(),
            image_root: layout.image_archive_dir(),
            document_root: layout.document_archive_dir(),
            enabled: processing.archive_after_processing,
            timestamp_format: processing.timestamp_format.clone(),
            log,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Moves `images` into a fresh batch directory. Returns the batch
    /// directory, or `None` when archiving is disabled.
    pub fn archive_folder_images(
        &self,
        folder: &str,
        images: &[PathBuf],
        now: DateTime<Local>,
    ) -> Result<Option<PathBuf>, ArchiveError> {
        if !self.enabled {
            self.log.file_op("Archiving disabled in configuration");
            return Ok(None);
        }

        let month_dir = self.month_dir(&self.image_root, now);
        let batch_dir = unique_dir(&month_dir.join(format!(
            "{folder}_{}",
            now.format(&self.timestamp_format)
        )));
        fs::create_dir_all(&batch_dir).map_err(|source| ArchiveError::CreateDir {
            path: batch_dir.clone(),
            source,
        })?;

        let mut moved = 0;
        for image in images {
            let Some(name) = image.file_name() else { continue };
            let destination = batch_dir.join(name);
            match move_file(image, &destination) {
                Ok(()) => {
                    moved += 1;
                    self.log.file_op(format!(
                        "Archived image: {} -> {}",
                        image.display(),
                        destination.display()
                    ));
                }
                Err(err) => self.log.failure("Failed to archive image", &err),
            }
        }

        self.log.file_op(format!(
            "Image archiving completed for {folder}: {moved}/{} files archived",
            images.len()
        ));
        if moved == images.len() {
            Ok(Some(batch_dir))
        } else {
            Err(ArchiveError::Partial {
                folder: folder.to_string(),
                moved,
                total: images.len(),
            })
        }
    }

    /// Moves a sent document and its sidecar into the dated document archive.
    /// Returns the archived document path, or `None` when archiving is
    /// disabled. The document is moved even when its sidecar is missing, but
    /// that is still reported as an error.
    pub fn archive_document(
        &self,
        document: &Path,
        now: DateTime<Local>,
    ) -> Result<Option<PathBuf>, ArchiveError> {
        if !self.enabled {
            return Ok(None);
        }
        if !document.is_file() {
            return Err(ArchiveError::MissingDocument(document.to_path_buf()));
        }

        let month_dir = self.month_dir(&self.document_root, now);
        fs::create_dir_all(&month_dir).map_err(|source| ArchiveError::CreateDir {
            path: month_dir.clone(),
            source,
        })?;

        let stem = document
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = document
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let destination = month_dir.join(format!(
            "{stem}_sent_{}{extension}",
            now.format(&self.timestamp_format)
        ));

        move_file(document, &destination)?;
        self.log.file_op(format!(
            "Archived sent document: {} -> {}",
            document.display(),
            destination.display()
        ));

        let sidecar = sidecar_path(document);
        if !sidecar.is_file() {
            return Err(ArchiveError::MissingSidecar(sidecar));
        }
        let sidecar_destination = sidecar_path(&destination);
        move_file(&sidecar, &sidecar_destination)?;
        self.log.file_op(format!(
            "Archived document metadata: {}",
            sidecar_destination.display()
        ));
        Ok(Some(destination))
    }

    /// Deletes archived files not modified within `retention_days`, then any
    /// directory left empty, deepest first.
    pub fn sweep_retention(&self, retention_days: u32, now: SystemTime) -> SweepCounts {
        let mut counts = SweepCounts::default();
        if !self.archive_root.exists() {
            return counts;
        }
        let cutoff = cutoff(now, retention_days);

        let mut files = Vec::new();
        let mut directories = Vec::new();
        for entry in WalkDir::new(&self.archive_root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    counts.failures += 1;
                    self.log.failure("Failed to traverse archive", &err);
                    continue;
                }
            };
            if entry.path() == self.archive_root {
                continue;
            }
            if entry.file_type().is_dir() {
                directories.push(entry);
            } else {
                files.push(entry);
            }
        }

        for entry in files {
            if !is_older_than(entry.path(), cutoff) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    counts.files_removed += 1;
                    self.log
                        .file_op(format!("Cleaned up old file: {}", entry.path().display()));
                }
                Err(err) => {
                    counts.failures += 1;
                    self.log.failure(
                        format!("Failed to remove {}", entry.path().display()),
                        &err,
                    );
                }
            }
        }

        directories.sort_by_key(walkdir::DirEntry::depth);
        directories.reverse();
        for entry in directories {
            // The fixed roots stay even when empty.
            if entry.path() == self.image_root || entry.path() == self.document_root {
                continue;
            }
            let empty = entry
                .path()
                .read_dir()
                .map(|mut iter| iter.next().is_none())
                .unwrap_or(false);
            if empty && fs::remove_dir(entry.path()).is_ok() {
                counts.dirs_removed += 1;
            }
        }

        if counts.files_removed + counts.dirs_removed > 0 {
            self.log.file_op(format!(
                "Archive cleanup completed: {} files, {} empty directories removed",
                counts.files_removed, counts.dirs_removed
            ));
        }
        counts
    }

    fn month_dir(&self, root: &Path, now: DateTime<Local>) -> PathBuf {
        root.join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
    }
}

/// Deletes files directly inside `dir` whose extension is one of
/// `extensions` and that were not modified within `max_age_days`.
pub fn prune_stale_files(
    dir: &Path,
    max_age_days: u32,
    now: SystemTime,
    extensions: &[&str],
    log: &ActivityLog,
) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let cutoff = cutoff(now, max_age_days);
    let mut removed = 0;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e));
        if !matches || !path.is_file() || !is_older_than(&path, cutoff) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                log.file_op(format!("Removed stale file: {}", path.display()));
            }
            Err(err) => log.failure(format!("Failed to remove {}", path.display()), &err),
        }
    }
    removed
}

fn cutoff(now: SystemTime, days: u32) -> SystemTime {
    now.checked_sub(Duration::from_secs(u64::from(days) * SECONDS_PER_DAY))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn is_older_than(path: &Path, cutoff: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| modified < cutoff)
        .unwrap_or(false)
}

/// `dir`, or `dir_2`, `dir_3`, ... when it already exists.
fn unique_dir(dir: &Path) -> PathBuf {
    if !dir.exists() {
        return dir.to_path_buf();
    }
    let base = dir.as_os_str().to_string_lossy().into_owned();
    (2..)
        .map(|n| PathBuf::from(format!("{base}_{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dir.to_path_buf())
}

/// Rename, falling back to copy-and-delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), ArchiveError> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    let options = fs_extra::file::CopyOptions::new();
    fs_extra::file::move_file(from, to, &options)
        .map(|_| ())
        .map_err(|err| ArchiveError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            message: err.to_string(),
        })
}
