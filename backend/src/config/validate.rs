use chrono::format::{Item, StrftimeItems};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::settings::TransportKind;
use crate::config::ConfigSnapshot;

/// A single way in which a snapshot is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    SmtpSettingMissing(&'static str),
    AdminRecipientsMissing,
    NoFolders,
    NoEntries,
    /// A mailing list entry names a document no folder produces.
    UndefinedDocument(String),
    /// A folder produces a document nobody receives.
    UnaddressedDocument(String),
    /// Every mailing list entry of this document lost all of its recipients.
    NoValidRecipients(String),
    SharedDocument {
        document: String,
        folders: Vec<String>,
    },
    /// A strftime pattern chrono cannot render.
    InvalidFormat { field: &'static str, pattern: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::SmtpSettingMissing(field) => {
                write!(f, "SMTP transport configured but `{field}` is empty")
            }
            Violation::AdminRecipientsMissing => write!(
                f,
                "administrator notifications enabled but no valid admin_emails configured"
            ),
            Violation::NoFolders => write!(f, "no folder mappings defined"),
            Violation::NoEntries => write!(f, "no mailing list entries defined"),
            Violation::UndefinedDocument(doc) => {
                write!(f, "mailing list references undefined document `{doc}`")
            }
            Violation::UnaddressedDocument(doc) => {
                write!(f, "document `{doc}` has no mailing list entry")
            }
            Violation::NoValidRecipients(doc) => {
                write!(f, "document `{doc}` has no entry with a valid recipient")
            }
            Violation::SharedDocument { document, folders } => write!(
                f,
                "document `{document}` is produced by several folders: {}",
                folders.join(", ")
            ),
            Violation::InvalidFormat { field, pattern } => {
                write!(f, "`{field}` is not a valid date format: `{pattern}`")
            }
        }
    }
}

/// Checks a snapshot for consistency. Pure; the loader treats any result as
/// fatal while diagnostics only reports it.
pub fn validate(snapshot: &ConfigSnapshot) -> Vec<Violation> {
    let mut violations = Vec::new();
    let settings = &snapshot.settings;

    if settings.email.transport_chain().contains(&TransportKind::Smtp) {
        let email = &settings.email;
        for (field, value) in [
            ("smtp_server", &email.smtp_server),
            ("smtp_username", &email.smtp_username),
            ("smtp_password", &email.smtp_password),
        ] {
            if value.trim().is_empty() {
                violations.push(Violation::SmtpSettingMissing(field));
            }
        }
    }

    let processing = &settings.processing;
    for (field, pattern) in [
        ("date_format", &processing.date_format),
        ("timestamp_format", &processing.timestamp_format),
    ] {
        if !is_renderable_format(pattern) {
            violations.push(Violation::InvalidFormat {
                field,
                pattern: pattern.clone(),
            });
        }
    }

    let admin = &settings.admin;
    if (admin.send_summary_email || admin.send_error_notifications)
        && snapshot.admin_emails.is_empty()
    {
        violations.push(Violation::AdminRecipientsMissing);
    }

    if snapshot.folder_to_document.is_empty() {
        violations.push(Violation::NoFolders);
    }
    if snapshot.entries.is_empty() && snapshot.unaddressed_documents.is_empty() {
        violations.push(Violation::NoEntries);
    }

    let global = snapshot.global_document();
    let defined: BTreeSet<&str> = snapshot
        .folder_to_document
        .values()
        .map(String::as_str)
        .collect();
    let addressed: BTreeSet<&str> = snapshot
        .entries
        .iter()
        .map(|e| e.document.as_str())
        .collect();

    let undefined: BTreeSet<&str> = snapshot
        .entries
        .iter()
        .map(|e| e.document.as_str())
        .chain(snapshot.unaddressed_documents.iter().map(String::as_str))
        .filter(|doc| !defined.contains(doc))
        .collect();
    for doc in undefined {
        violations.push(Violation::UndefinedDocument(doc.to_string()));
    }

    for doc in &defined {
        if Some(*doc) == global || addressed.contains(doc) {
            continue;
        }
        if snapshot.unaddressed_documents.contains(*doc) {
            violations.push(Violation::NoValidRecipients(doc.to_string()));
        } else {
            violations.push(Violation::UnaddressedDocument(doc.to_string()));
        }
    }

    let mut producers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (folder, doc) in &snapshot.folder_to_document {
        producers.entry(doc.as_str()).or_default().push(folder.clone());
    }
    for (doc, folders) in producers {
        if folders.len() > 1 {
            violations.push(Violation::SharedDocument {
                document: doc.to_string(),
                folders,
            });
        }
    }

    violations
}

/// chrono panics while displaying a pattern with an unknown specifier.
fn is_renderable_format(pattern: &str) -> bool {
    !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}
