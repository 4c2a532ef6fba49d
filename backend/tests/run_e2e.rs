//! Full runs against a temporary storage tree, with the renderer and the mail
//! transports replaced by recording fakes.

use bimailer::config::{ConfigStore, FOLDER_MAP_FILE, MAILING_LIST_FILE, SETTINGS_FILE};
use bimailer::job_controller::coordinator::RunCoordinator;
use bimailer::logging::ActivityLog;
use bimailer::paths::Layout;
use bimailer::services::dispatch::{DispatchError, Dispatcher, OutgoingMessage, Transport};
use bimailer::services::documents::{BuildError, DocumentBuilder, RenderRequest};
use chrono::Utc;
use common::model::document::{DocumentMetadata, ImageRecord};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use walkdir::WalkDir;

const SETTINGS: &str = r#"
[email]
smtp_server = "smtp.example.com"
smtp_port = 587
smtp_username = "reports@example.com"
smtp_password = "secret"
use_tls = true

[general]
log_retention_days = 30
max_attachment_size_mb = 5
processing_lock_timeout_minutes = 30

[admin]
admin_emails = "ops@example.com"
send_summary_email = true
send_error_notifications = true
"#;

const FOLDERS: &str = "FolderName,PDFName\nA,Report-A\nB,Report-B\nALL,Global Headers\n";

const MAILING: &str = "PDFName,Recipients,CC,Subject\n\
                       Report-A,a@example.com;not-an-address,,Report A [DATE]\n\
                       Report-B,b1@example.com,,Report B [DATE]\n\
                       Report-B,b2@example.com,boss@example.com,Report B [DATE]\n";

type Pages = Rc<RefCell<Vec<(String, Vec<String>)>>>;
type Outbox = Rc<RefCell<Vec<OutgoingMessage>>>;

struct RecordingBuilder {
    pages: Pages,
}

impl DocumentBuilder for RecordingBuilder {
    fn render(&self, request: &RenderRequest<'_>) -> Result<DocumentMetadata, BuildError> {
        let names: Vec<String> = request.images.iter().map(|i| i.file_name()).collect();
        self.pages
            .borrow_mut()
            .push((request.source_folder.to_string(), names));
        fs::write(request.destination, b"%PDF-1.4 fake").map_err(|source| BuildError::Io {
            path: request.destination.to_path_buf(),
            source,
        })?;
        Ok(DocumentMetadata {
            document_name: request.document_name.to_string(),
            source_folder: request.source_folder.to_string(),
            created_at: Utc::now(),
            images: request
                .images
                .iter()
                .map(|image| ImageRecord {
                    filename: image.file_name(),
                    created_at: Utc::now(),
                    width: 800,
                    height: 600,
                    size_bytes: 3,
                    origin: image.origin,
                })
                .collect(),
        })
    }
}

/// Accepts everything except messages addressed to `refused`.
struct RecordingTransport {
    outbox: Outbox,
    refused: Option<&'static str>,
}

impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(&self, message: &OutgoingMessage) -> Result<(), DispatchError> {
        if let Some(refused) = self.refused {
            if message.to.iter().any(|a| a == refused) {
                return Err(DispatchError::Build(format!("{refused} rejected")));
            }
        }
        self.outbox.borrow_mut().push(message.clone());
        Ok(())
    }
}

struct Site {
    _dir: TempDir,
    layout: Layout,
    pages: Pages,
    mail: Outbox,
    admin: Outbox,
}

impl Site {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        let config = layout.config_dir();
        fs::create_dir_all(config).unwrap();
        fs::write(config.join(SETTINGS_FILE), SETTINGS).unwrap();
        fs::write(config.join(FOLDER_MAP_FILE), FOLDERS).unwrap();
        fs::write(config.join(MAILING_LIST_FILE), MAILING).unwrap();
        layout.ensure_runtime_dirs().unwrap();
        Self {
            _dir: dir,
            layout,
            pages: Rc::default(),
            mail: Rc::default(),
            admin: Rc::default(),
        }
    }

    fn image(&self, folder: &str, name: &str) -> PathBuf {
        let dir = self.layout.folder_dir(folder);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, folder.as_bytes()).unwrap();
        path
    }

    fn coordinator(&self, refused: Option<&'static str>, log: ActivityLog) -> RunCoordinator {
        let snapshot = ConfigStore::new(self.layout.config_dir(), log.scoped("config"))
            .load()
            .unwrap();
        RunCoordinator::new(
            snapshot,
            self.layout.clone(),
            Box::new(RecordingBuilder {
                pages: self.pages.clone(),
            }),
            Dispatcher::new(
                vec![Box::new(RecordingTransport {
                    outbox: self.mail.clone(),
                    refused,
                })],
                log.scoped("dispatch"),
            ),
            Dispatcher::new(
                vec![Box::new(RecordingTransport {
                    outbox: self.admin.clone(),
                    refused: None,
                })],
                log.scoped("dispatch"),
            ),
            log,
        )
    }
}

fn files_under(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.to_string_lossy().ends_with(suffix))
        .collect()
}

#[test]
fn failed_recipient_group_is_retried_on_the_next_run() {
    let site = Site::new();
    site.image("ALL", "header.png");
    let shadowed = site.image("A", "header.png");
    let chart = site.image("A", "chart.png");
    let sales = site.image("B", "sales.png");

    // First run: one of the two Report-B groups is refused.
    let log = ActivityLog::capturing("coordinator");
    let summary = site
        .coordinator(Some("b2@example.com"), log.clone())
        .run_all()
        .unwrap();

    assert_eq!(summary.folders_processed(), 2);
    assert_eq!(summary.documents_built(), 2);
    assert_eq!(summary.dispatches_succeeded(), 1);
    assert!(!summary.all_dispatched());
    let b = summary.outcomes.iter().find(|o| o.folder_id == "B").unwrap();
    assert_eq!(b.error.as_deref(), Some("dispatch failed for 1 of 2 entries"));
    assert!(!b.archived);

    // The global header replaced the folder's own copy, on a single page.
    let pages = site.pages.borrow().clone();
    assert_eq!(
        pages[0],
        (
            "A".to_string(),
            vec!["header.png".to_string(), "chart.png".to_string()]
        )
    );

    // Report-A went out once to the valid address only.
    let mail = site.mail.borrow().clone();
    let report_a: Vec<_> = mail
        .iter()
        .filter(|m| m.subject.starts_with("Report A"))
        .collect();
    assert_eq!(report_a.len(), 1);
    assert_eq!(report_a[0].to, vec!["a@example.com"]);
    assert!(report_a[0].body.contains("chart.png"));
    assert!(log
        .captured()
        .iter()
        .any(|r| r.message.contains("not-an-address")));

    // A is archived; B stays put for the retry.
    assert!(!chart.exists());
    assert!(!shadowed.exists());
    assert!(site.layout.folder_dir("ALL").join("header.png").exists());
    assert!(sales.exists());
    let archived_docs = files_under(&site.layout.document_archive_dir(), ".pdf");
    assert_eq!(archived_docs.len(), 1);
    let name = archived_docs[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("Report-A_") && name.contains("_sent_"));
    assert_eq!(files_under(&site.layout.document_archive_dir(), ".json").len(), 1);
    assert_eq!(files_under(&site.layout.output_dir(), ".pdf").len(), 1);
    assert_eq!(files_under(&site.layout.image_archive_dir(), ".png").len(), 2);

    {
        let admin = site.admin.borrow();
        assert_eq!(admin.len(), 1);
        assert!(admin[0].body.contains("B: dispatch failed for 1 of 2 entries"));
    }
    assert!(!site.layout.lock_file().exists());

    // Second run: the refused group accepts now.
    let summary = site
        .coordinator(None, ActivityLog::new("coordinator"))
        .run_all()
        .unwrap();
    assert_eq!(summary.folders_processed(), 1);
    assert!(summary.all_dispatched());
    assert!(!sales.exists());

    let mail = site.mail.borrow();
    let to_b2: Vec<_> = mail
        .iter()
        .filter(|m| m.to == vec!["b2@example.com".to_string()])
        .collect();
    assert_eq!(to_b2.len(), 1);
    assert_eq!(to_b2[0].cc, vec!["boss@example.com"]);
    assert_eq!(files_under(&site.layout.document_archive_dir(), ".pdf").len(), 2);
    assert_eq!(site.admin.borrow().len(), 2);
}

#[test]
fn invalid_configuration_never_reaches_the_lock() {
    let site = Site::new();
    fs::write(
        site.layout.config_dir().join(MAILING_LIST_FILE),
        "PDFName,Recipients,Subject\nReport-A,a@example.com,Weekly\nReport-Z,z@example.com,Weekly\n",
    )
    .unwrap();

    let err = ConfigStore::new(site.layout.config_dir(), ActivityLog::new("config"))
        .load()
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Report-Z"));
    assert!(message.contains("Report-B"));
    assert!(!site.layout.lock_file().exists());
}
