//! Rendering a folder's images into one document.
//!
//! The pipeline only sees the [`DocumentBuilder`] trait; [`pdf::PdfRenderer`]
//! is the production implementation.

pub mod metadata;
pub mod pdf;
pub mod sources;

use common::model::document::DocumentMetadata;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use sources::SourceImage;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no images to render")]
    NoImages,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("rendering failed: {0}")]
    Render(#[from] printpdf::Error),
    #[error("failed to write metadata sidecar: {0}")]
    Metadata(#[from] metadata::MetadataError),
}

/// One document to render.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub document_name: &'a str,
    pub source_folder: &'a str,
    /// Pages in order.
    pub images: &'a [SourceImage],
    pub destination: &'a Path,
}

/// Turns an ordered image list into a paginated document at the requested
/// destination and reports what went into it, one record per page.
pub trait DocumentBuilder {
    fn render(&self, request: &RenderRequest<'_>) -> Result<DocumentMetadata, BuildError>;
}

/// Replaces characters not allowed in file names and trims the result.
pub fn clean_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn document_file_name(document_name: &str, timestamp: &str) -> String {
    format!("{}_{}.pdf", clean_filename(document_name), timestamp)
}
