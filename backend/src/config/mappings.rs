//! Folder → document mapping and the mailing list, both CSV.
//!
//! `pdf_names.csv` needs `FolderName,PDFName`; `mailing_list.csv` needs
//! `PDFName,Recipients,Subject` and may carry `CC`.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::address;
use crate::config::ConfigError;
use crate::logging::ActivityLog;

#[derive(Debug, Deserialize)]
struct FolderRow {
    #[serde(rename = "FolderName")]
    folder: String,
    #[serde(rename = "PDFName")]
    document: String,
}

#[derive(Debug, Deserialize)]
struct MailingRow {
    #[serde(rename = "PDFName")]
    document: String,
    #[serde(rename = "Recipients", default)]
    recipients: String,
    #[serde(rename = "CC", default)]
    cc: String,
    #[serde(rename = "Subject")]
    subject: String,
}

/// One dispatch target for a document. Several entries may share a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientEntry {
    pub document: String,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    /// Subject with an optional `[DATE]` placeholder.
    pub subject_template: String,
}

/// Mailing list rows that survived address filtering, plus the documents of
/// rows that were dropped for having no valid recipient left.
#[derive(Debug, Default, Clone)]
pub struct MailingList {
    pub entries: Vec<RecipientEntry>,
    pub unaddressed: BTreeSet<String>,
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, ConfigError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ConfigError::schema(path, e))
}

pub fn read_folder_map(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut map = BTreeMap::new();
    for row in reader(path)?.deserialize::<FolderRow>() {
        let row = row.map_err(|e| ConfigError::schema(path, e))?;
        if row.folder.is_empty() || row.document.is_empty() {
            return Err(ConfigError::schema(
                path,
                "FolderName and PDFName must not be empty",
            ));
        }
        if map.contains_key(&row.folder) {
            return Err(ConfigError::schema(
                path,
                format!("folder `{}` is mapped more than once", row.folder),
            ));
        }
        map.insert(row.folder, row.document);
    }
    Ok(map)
}

pub fn read_mailing_list(path: &Path, log: &ActivityLog) -> Result<MailingList, ConfigError> {
    let mut list = MailingList::default();
    for row in reader(path)?.deserialize::<MailingRow>() {
        let row = row.map_err(|e| ConfigError::schema(path, e))?;
        if row.document.is_empty() {
            return Err(ConfigError::schema(path, "PDFName must not be empty"));
        }
        let recipients = address::split(&row.recipients, log);
        let cc = address::split(&row.cc, log);
        if recipients.is_empty() {
            log.error(format!(
                "No valid recipients for document `{}`; entry skipped",
                row.document
            ));
            list.unaddressed.insert(row.document);
            continue;
        }
        list.entries.push(RecipientEntry {
            document: row.document,
            recipients,
            cc,
            subject_template: row.subject,
        });
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn folder_map_is_read_and_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "pdf_names.csv",
            "FolderName,PDFName\nA, Report-A\nALL,Global Headers\n",
        );
        let map = read_folder_map(&path).unwrap();
        assert_eq!(map.get("A").map(String::as_str), Some("Report-A"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn duplicate_folder_is_a_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "pdf_names.csv", "FolderName,PDFName\nA,X\nA,Y\n");
        let err = read_folder_map(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn missing_column_is_a_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "pdf_names.csv", "Folder,PDFName\nA,X\n");
        let err = read_folder_map(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn mailing_rows_are_split_and_filtered() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "mailing_list.csv",
            "PDFName,Recipients,CC,Subject\n\
             Report-A,a@example.com;b@example.com;broken,,Report [DATE]\n\
             Report-B,nobody,,Orphan\n",
        );
        let log = ActivityLog::capturing("config");
        let list = read_mailing_list(&path, &log).unwrap();
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].recipients, vec!["a@example.com", "b@example.com"]);
        assert!(list.entries[0].cc.is_empty());
        assert!(list.unaddressed.contains("Report-B"));
    }

    #[test]
    fn cc_column_is_optional() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "mailing_list.csv",
            "PDFName,Recipients,Subject\nReport-A,a@example.com,Weekly\n",
        );
        let list = read_mailing_list(&path, &ActivityLog::new("config")).unwrap();
        assert_eq!(list.entries.len(), 1);
        assert!(list.entries[0].cc.is_empty());
    }
}
