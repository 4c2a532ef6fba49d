//! Logging capability handed to every component at construction.
//!
//! Components never reach for the global logger directly. Each one receives an
//! `ActivityLog` scoped with its component name and writes through one of four
//! channels, which become `log` targets:
//!
//! - `bimailer::files`: file operations (rendering, moves, cleanup)
//! - `bimailer::email`: dispatch and notifications
//! - `bimailer::errors`: warnings and failures
//! - `bimailer::summary`: run-level progress
//!
//! A capturing log additionally keeps every record in memory so tests can
//! assert on what was reported.

use chrono::Local;
use env_logger::{Env, Target};
use log::Level;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const FILES: &str = "bimailer::files";
pub const EMAIL: &str = "bimailer::email";
pub const ERRORS: &str = "bimailer::errors";
pub const SUMMARY: &str = "bimailer::summary";

/// Prefix and extension of the monthly log files.
pub const LOG_FILE_PREFIX: &str = "bimailer_";
pub const LOG_FILE_EXTENSION: &str = "log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Files,
    Email,
    Errors,
    Summary,
}

impl Channel {
    fn target(self) -> &'static str {
        match self {
            Channel::Files => FILES,
            Channel::Email => EMAIL,
            Channel::Errors => ERRORS,
            Channel::Summary => SUMMARY,
        }
    }
}

/// A record kept by a capturing log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub channel: Channel,
    pub level: Level,
    pub component: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ActivityLog {
    component: &'static str,
    capture: Option<Arc<Mutex<Vec<CapturedRecord>>>>,
}

impl ActivityLog {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            capture: None,
        }
    }

    /// A log that also records everything it is given.
    pub fn capturing(component: &'static str) -> Self {
        Self {
            component,
            capture: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Same sink, different component name.
    pub fn scoped(&self, component: &'static str) -> Self {
        Self {
            component,
            capture: self.capture.clone(),
        }
    }

    pub fn file_op(&self, message: impl Display) {
        self.emit(Channel::Files, Level::Info, message);
    }

    pub fn email(&self, message: impl Display) {
        self.emit(Channel::Email, Level::Info, message);
    }

    pub fn summary(&self, message: impl Display) {
        self.emit(Channel::Summary, Level::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.emit(Channel::Errors, Level::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.emit(Channel::Errors, Level::Error, message);
    }

    /// Logs a failure together with the error's source chain.
    pub fn failure(&self, context: impl Display, err: &dyn std::error::Error) {
        let mut message = format!("{context}: {err}");
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        self.emit(Channel::Errors, Level::Error, message);
    }

    /// Records captured so far, oldest first. Empty for a non-capturing log.
    pub fn captured(&self) -> Vec<CapturedRecord> {
        match &self.capture {
            Some(records) => records.lock().map(|r| r.clone()).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn emit(&self, channel: Channel, level: Level, message: impl Display) {
        let message = message.to_string();
        log::log!(target: channel.target(), level, "[{}] {}", self.component, message);
        if let Some(records) = &self.capture {
            if let Ok(mut records) = records.lock() {
                records.push(CapturedRecord {
                    channel,
                    level,
                    component: self.component,
                    message,
                });
            }
        }
    }
}

/// Writes every log line to stderr and to the current monthly log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!(
        "{LOG_FILE_PREFIX}{}.{LOG_FILE_EXTENSION}",
        Local::now().format("%Y-%m")
    ))
}

/// Installs the process logger. Output goes to stderr and, when `log_dir` is
/// given and writable, is teed into the monthly log file. Returns the log file
/// in use, if any.
pub fn init(log_dir: Option<&Path>) -> Option<PathBuf> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));

    let mut file_in_use = None;
    let mut open_error = None;
    if let Some(dir) = log_dir {
        let path = log_file_path(dir);
        let opened = fs::create_dir_all(dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
        match opened {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(Tee { file })));
                file_in_use = Some(path);
            }
            Err(err) => open_error = Some((path, err)),
        }
    }

    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();

    if let Some((path, err)) = open_error {
        ActivityLog::new("logging").warn(format!(
            "log file {} unavailable, logging to stderr only: {err}",
            path.display()
        ));
    }
    file_in_use
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturing_log_keeps_channel_and_component() {
        let log = ActivityLog::capturing("config");
        let scoped = log.scoped("archiver");
        log.warn("dropped invalid address");
        scoped.file_op("moved 3 files");

        let records = log.captured();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].channel, Channel::Errors);
        assert_eq!(records[0].level, Level::Warn);
        assert_eq!(records[0].component, "config");
        assert_eq!(records[1].channel, Channel::Files);
        assert_eq!(records[1].component, "archiver");
    }

    #[test]
    fn failure_includes_source_chain() {
        let log = ActivityLog::capturing("test");
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        log.failure("could not read marker", &err);
        assert_eq!(log.captured()[0].message, "could not read marker: gone");
    }

    #[test]
    fn plain_log_captures_nothing() {
        let log = ActivityLog::new("quiet");
        log.summary("hello");
        assert!(log.captured().is_empty());
    }

    #[test]
    fn log_file_is_monthly() {
        let path = log_file_path(Path::new("/var/log/bimailer"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(LOG_FILE_PREFIX));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "bimailer_2026-10.log".len());
    }
}
