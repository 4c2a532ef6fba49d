//! Subject, body and `mailto:` construction.

use chrono::{DateTime, Local};
use common::model::document::DocumentMetadata;
use std::fmt::Write as _;
use std::path::Path;

pub const DATE_PLACEHOLDER: &str = "[DATE]";
const FILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone)]
pub struct MessageComposer {
    date_format: String,
    signature: String,
}

impl MessageComposer {
    pub fn new(date_format: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            date_format: date_format.into(),
            signature: signature.into(),
        }
    }

    pub fn subject(&self, template: &str, now: DateTime<Local>) -> String {
        template.replace(
            DATE_PLACEHOLDER,
            &now.format(&self.date_format).to_string(),
        )
    }

    /// Body listing every page of the document, rebuilt from its sidecar.
    pub fn body(&self, metadata: &DocumentMetadata, now: DateTime<Local>) -> String {
        let mut files = String::new();
        for image in &metadata.images {
            let _ = writeln!(
                files,
                "  • {} (Created: {}, Size: {})",
                image.filename,
                image.created_at.with_timezone(&Local).format(FILE_TIME_FORMAT),
                image.dimensions()
            );
        }
        if files.is_empty() {
            files.push_str("  • No file details available\n");
        }

        format!(
            "Dear Recipients,\n\n\
             Please find attached the {name} report.\n\n\
             Files included in this report:\n\
             {files}\n\
             Report generated on: {date} at {time}\n\n\
             Best regards,\n\
             {signature}",
            name = metadata.document_name,
            date = now.format(&self.date_format),
            time = now.format("%Y-%m-%d %H:%M:%S"),
            signature = self.signature,
        )
    }
}

/// Body for a mail client that cannot attach files by itself.
pub fn with_attachment_instructions(body: &str, attachment: &Path) -> String {
    let absolute = std::path::absolute(attachment).unwrap_or_else(|_| attachment.to_path_buf());
    let name = attachment
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "{body}\n\n=== ATTACHMENT REQUIRED ===\n\
         Please manually attach the following file to this email:\n\
         File: {name}\n\
         Location: {}\n",
        absolute.display()
    )
}

pub fn mailto_url(to: &[String], cc: &[String], subject: &str, body: &str) -> String {
    let mut url = format!(
        "mailto:{}?subject={}&body={}",
        to.join(";"),
        urlencoding::encode(subject),
        urlencoding::encode(body)
    );
    if !cc.is_empty() {
        url.push_str("&cc=");
        url.push_str(&cc.join(";"));
    }
    url
}
