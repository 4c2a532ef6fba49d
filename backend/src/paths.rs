//! Storage layout shared by every component.
//!
//! All paths hang off a single base directory; the configuration directory may
//! be relocated independently.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "Config";
const INPUT_DIR: &str = "Input";
const OUTPUT_DIR: &str = "Output";
const DOCUMENTS_DIR: &str = "PDFs";
const ARCHIVE_DIR: &str = "Archive";
const ARCHIVE_IMAGES_DIR: &str = "images";
const ARCHIVE_DOCUMENTS_DIR: &str = "documents";
const LOGS_DIR: &str = "Logs";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
    config_dir: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let config_dir = base.join(CONFIG_DIR);
        Self { base, config_dir }
    }

    pub fn with_config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = config_dir.into();
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Parent of every source folder.
    pub fn input_dir(&self) -> PathBuf {
        self.base.join(INPUT_DIR)
    }

    pub fn folder_dir(&self, folder: &str) -> PathBuf {
        self.input_dir().join(folder)
    }

    /// Where rendered documents wait until they are archived.
    pub fn output_dir(&self) -> PathBuf {
        self.base.join(OUTPUT_DIR).join(DOCUMENTS_DIR)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.base.join(ARCHIVE_DIR)
    }

    pub fn image_archive_dir(&self) -> PathBuf {
        self.archive_dir().join(ARCHIVE_IMAGES_DIR)
    }

    pub fn document_archive_dir(&self) -> PathBuf {
        self.archive_dir().join(ARCHIVE_DOCUMENTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join(LOGS_DIR)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.base.join(LOCK_FILE)
    }

    /// Creates the directories a run writes into. The input tree is owned by
    /// whoever drops images and is never created here.
    pub fn ensure_runtime_dirs(&self) -> io::Result<()> {
        for dir in [
            self.output_dir(),
            self.image_archive_dir(),
            self.document_archive_dir(),
            self.logs_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
