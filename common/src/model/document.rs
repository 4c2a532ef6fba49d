use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a page's source image came from.
///
/// Images from the global folder are merged into every folder's document and
/// win over a folder-specific image carrying the same filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrigin {
    Global,
    Folder,
}

/// Per-page record captured while rendering a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// File name of the source image (no directory part).
    pub filename: String,
    /// Creation time of the source file, or its modification time where the
    /// platform does not track creation.
    pub created_at: DateTime<Utc>,
    /// Intrinsic pixel width.
    pub width: u32,
    /// Intrinsic pixel height.
    pub height: u32,
    /// Size of the source file on disk.
    pub size_bytes: u64,
    pub origin: ImageOrigin,
}

impl ImageRecord {
    /// Pixel dimensions formatted as `WxH`.
    pub fn dimensions(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Metadata sidecar persisted next to every rendered document.
///
/// Written once the document is rendered and read back at dispatch time so
/// the email body can list the included files without touching the images
/// again. It moves into the archive together with the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_name: String,
    pub source_folder: String,
    pub created_at: DateTime<Utc>,
    /// One record per page, in page order.
    pub images: Vec<ImageRecord>,
}

impl DocumentMetadata {
    /// Metadata used when a sidecar is missing or unreadable.
    pub fn placeholder(document_name: &str, source_folder: &str) -> Self {
        Self {
            document_name: document_name.to_string(),
            source_folder: source_folder.to_string(),
            created_at: Utc::now(),
            images: Vec::new(),
        }
    }
}
