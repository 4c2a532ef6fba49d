//! Configuration loading.
//!
//! A run works against one immutable [`ConfigSnapshot`] built from three files
//! in the configuration directory. A snapshot that fails [`validate`] never
//! reaches the pipeline.

pub mod address;
pub mod mappings;
pub mod settings;
pub mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::logging::ActivityLog;
pub use mappings::RecipientEntry;
pub use settings::Settings;
pub use validate::{validate, Violation};

pub const SETTINGS_FILE: &str = "settings.toml";
pub const FOLDER_MAP_FILE: &str = "pdf_names.csv";
pub const MAILING_LIST_FILE: &str = "mailing_list.csv";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    MissingFile(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid {path}: {message}")]
    Schema { path: PathBuf, message: String },
    #[error("inconsistent configuration: {}", join(.violations))]
    CrossReference { violations: Vec<Violation> },
}

impl ConfigError {
    pub(crate) fn schema(path: &Path, message: impl Display) -> Self {
        ConfigError::Schema {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub settings: Settings,
    pub folder_to_document: BTreeMap<String, String>,
    /// Mailing list entries in file order.
    pub entries: Vec<RecipientEntry>,
    pub admin_emails: Vec<String>,
    /// Documents of mailing list rows dropped for lack of a valid recipient.
    pub unaddressed_documents: BTreeSet<String>,
}

impl ConfigSnapshot {
    pub fn global_folder(&self) -> &str {
        &self.settings.processing.global_folder
    }

    pub fn global_document(&self) -> Option<&str> {
        self.folder_to_document
            .get(self.global_folder())
            .map(String::as_str)
    }

    pub fn document_for(&self, folder: &str) -> Option<&str> {
        self.folder_to_document.get(folder).map(String::as_str)
    }

    pub fn entries_for<'a>(
        &'a self,
        document: &'a str,
    ) -> impl Iterator<Item = &'a RecipientEntry> + 'a {
        self.entries.iter().filter(move |e| e.document == document)
    }

    /// Configured folders in name order, without the global pseudo-folder.
    pub fn processing_folders(&self) -> impl Iterator<Item = &str> {
        let global = self.global_folder();
        self.folder_to_document
            .keys()
            .map(String::as_str)
            .filter(move |f| *f != global)
    }

    pub fn max_attachment_bytes(&self) -> u64 {
        self.settings.general.max_attachment_bytes()
    }

    pub fn retention_days(&self) -> u32 {
        self.settings.general.log_retention_days
    }

    pub fn lock_timeout_minutes(&self) -> u32 {
        self.settings.general.processing_lock_timeout_minutes
    }
}

pub struct ConfigStore {
    dir: PathBuf,
    log: ActivityLog,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>, log: ActivityLog) -> Self {
        Self {
            dir: dir.into(),
            log,
        }
    }

    /// Loads and validates. Any violation is fatal.
    pub fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        let snapshot = self.load_unchecked()?;
        let violations = validate(&snapshot);
        if !violations.is_empty() {
            for v in &violations {
                self.log.error(format!("Configuration: {v}"));
            }
            return Err(ConfigError::CrossReference { violations });
        }
        self.log.summary(format!(
            "Configuration loaded: {} folders, {} mailing entries",
            snapshot.folder_to_document.len(),
            snapshot.entries.len()
        ));
        Ok(snapshot)
    }

    /// Loads without cross-reference checks, for reporting.
    pub fn load_unchecked(&self) -> Result<ConfigSnapshot, ConfigError> {
        let settings_path = self.require(SETTINGS_FILE)?;
        let folder_map_path = self.require(FOLDER_MAP_FILE)?;
        let mailing_path = self.require(MAILING_LIST_FILE)?;

        let content = fs::read_to_string(&settings_path).map_err(|source| ConfigError::Io {
            path: settings_path.clone(),
            source,
        })?;
        let settings = Settings::from_toml_str(&content)
            .map_err(|e| ConfigError::schema(&settings_path, e))?;

        let folder_to_document = mappings::read_folder_map(&folder_map_path)?;
        let mailing = mappings::read_mailing_list(&mailing_path, &self.log)?;
        let admin_emails = address::split(&settings.admin.admin_emails, &self.log);

        Ok(ConfigSnapshot {
            settings,
            folder_to_document,
            entries: mailing.entries,
            admin_emails,
            unaddressed_documents: mailing.unaddressed,
        })
    }

    fn require(&self, name: &str) -> Result<PathBuf, ConfigError> {
        let path = self.dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ConfigError::MissingFile(path))
        }
    }
}
