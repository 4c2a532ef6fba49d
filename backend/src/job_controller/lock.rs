//! Cross-run mutual exclusion.
//!
//! The lock is a JSON marker file created with exclusive-create semantics. It
//! is cooperative: every command that touches the input, output or archive
//! areas acquires it first. A marker whose `acquired_at` is older than the
//! configured timeout belongs to a run that died and is removed on the next
//! acquisition attempt. Acquisition never waits.

use chrono::{DateTime, Duration, Utc};
use common::model::lock::{LockMarker, LockStatus};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::logging::ActivityLog;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another run holds the lock (pid {owner_id}, since {acquired_at})")]
    Busy {
        owner_id: u32,
        acquired_at: DateTime<Utc>,
    },
    #[error("lock marker {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode lock marker: {0}")]
    Marker(#[from] serde_json::Error),
}

enum Observed {
    Absent,
    Present(LockMarker),
    Corrupt,
}

pub struct RunLock {
    path: PathBuf,
    timeout: Duration,
    override_existing: bool,
    log: ActivityLog,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>, timeout_minutes: u32, log: ActivityLog) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::minutes(i64::from(timeout_minutes)),
            override_existing: false,
            log,
        }
    }

    /// Remove any existing marker regardless of its age.
    pub fn override_existing(mut self, yes: bool) -> Self {
        self.override_existing = yes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn acquire(&self) -> Result<RunLockGuard, LockError> {
        self.acquire_at(Utc::now())
    }

    /// Acquires as if the current time were `now`.
    pub fn acquire_at(&self, now: DateTime<Utc>) -> Result<RunLockGuard, LockError> {
        match self.observe()? {
            Observed::Absent => {}
            Observed::Corrupt => {
                self.log
                    .warn(format!("Unreadable lock marker {} treated as stale", self.path.display()));
                self.remove_marker()?;
            }
            Observed::Present(marker) if self.override_existing => {
                self.log.warn(format!(
                    "Overriding existing lock held by pid {} since {}",
                    marker.owner_id, marker.acquired_at
                ));
                self.remove_marker()?;
            }
            Observed::Present(marker) if self.is_stale(&marker, now) => {
                self.log.warn(format!(
                    "Removing stale lock held by pid {} since {}",
                    marker.owner_id, marker.acquired_at
                ));
                self.remove_marker()?;
            }
            Observed::Present(marker) => {
                return Err(LockError::Busy {
                    owner_id: marker.owner_id,
                    acquired_at: marker.acquired_at,
                });
            }
        }

        let marker = LockMarker {
            acquired_at: now,
            owner_id: std::process::id(),
            host: host_name(),
        };
        let encoded = serde_json::to_vec_pretty(&marker)?;

        let created = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path);
        let mut file = match created {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                // Lost a race against another process between removal and creation.
                return match self.observe()? {
                    Observed::Present(other) => Err(LockError::Busy {
                        owner_id: other.owner_id,
                        acquired_at: other.acquired_at,
                    }),
                    _ => Err(self.io_error(err)),
                };
            }
            Err(err) => return Err(self.io_error(err)),
        };
        if let Err(err) = file.write_all(&encoded).and_then(|_| file.sync_all()) {
            let _ = fs::remove_file(&self.path);
            return Err(self.io_error(err));
        }

        self.log.file_op(format!(
            "Lock acquired at {} (pid {})",
            self.path.display(),
            marker.owner_id
        ));
        Ok(RunLockGuard {
            path: self.path.clone(),
            marker,
            log: self.log.clone(),
            released: false,
        })
    }

    /// Deletes the marker if present. Safe to call any number of times.
    pub fn release(&self) -> Result<(), LockError> {
        self.remove_marker()
    }

    pub fn status(&self) -> LockStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> LockStatus {
        match self.observe() {
            Ok(Observed::Absent) => LockStatus::Free,
            Ok(Observed::Present(marker)) if self.is_stale(&marker, now) => {
                LockStatus::Stale { marker }
            }
            Ok(Observed::Present(marker)) => LockStatus::Held { marker },
            Ok(Observed::Corrupt) | Err(_) => LockStatus::Corrupt,
        }
    }

    fn is_stale(&self, marker: &LockMarker, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(marker.acquired_at) > self.timeout
    }

    fn observe(&self) -> Result<Observed, LockError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)
                .map(Observed::Present)
                .unwrap_or(Observed::Corrupt)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Observed::Absent),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn remove_marker(&self) -> Result<(), LockError> {
        remove_if_present(&self.path).map_err(|err| self.io_error(err))
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Held for the duration of a run. Dropping it releases the lock.
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
    marker: LockMarker,
    log: ActivityLog,
    released: bool,
}

impl RunLockGuard {
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // A marker replaced after ours was judged stale belongs to someone else.
        let ours = fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockMarker>(&bytes).ok())
            .map_or(true, |on_disk| on_disk == self.marker);
        if !ours {
            self.log
                .warn("Lock marker was replaced by another run; leaving it in place");
            return Ok(());
        }

        remove_if_present(&self.path).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.log
            .file_op(format!("Lock released at {}", self.path.display()));
        Ok(())
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            self.log.failure("Failed to release run lock", &err);
        }
    }
}

/// Removes the marker at `path` if it was written by this process. Used from
/// the interrupt handler, where no guard is reachable.
pub fn release_if_owned(path: &Path) -> bool {
    let owned = fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockMarker>(&bytes).ok())
        .is_some_and(|marker| marker.owner_id == std::process::id());
    owned && fs::remove_file(path).is_ok()
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn host_name() -> Option<String> {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.is_empty())
}
