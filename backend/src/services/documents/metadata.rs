//! The `.json` sidecar kept next to every rendered document.

use common::model::document::DocumentMetadata;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SIDECAR_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `report_2026.pdf` → `report_2026.json`
pub fn sidecar_path(document: &Path) -> PathBuf {
    document.with_extension(SIDECAR_EXTENSION)
}

pub fn write(document: &Path, metadata: &DocumentMetadata) -> Result<PathBuf, MetadataError> {
    let path = sidecar_path(document);
    let json = serde_json::to_vec_pretty(metadata).map_err(|source| MetadataError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, json).map_err(|source| MetadataError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

pub fn read(document: &Path) -> Result<DocumentMetadata, MetadataError> {
    let path = sidecar_path(document);
    let bytes = fs::read(&path).map_err(|source| MetadataError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| MetadataError::Json { path, source })
}
