//! The per-folder state machine.
//!
//! `Start → Built → SizeValidated → Dispatched → Archived | SkippedArchive → Done`
//!
//! Every stage writes into one [`FolderOutcome`]. A failing stage records the
//! error and stops the folder; nothing done by an earlier stage is rolled
//! back. Inputs are only archived after every recipient entry went out, so a
//! failed folder is retried from the same images on the next run.

use chrono::Local;
use common::jobs::{FolderOutcome, PipelineStage};
use common::model::document::{DocumentMetadata, ImageOrigin};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ConfigSnapshot;
use crate::logging::ActivityLog;
use crate::paths::Layout;
use crate::services::archive::Archiver;
use crate::services::dispatch::compose::MessageComposer;
use crate::services::dispatch::{Dispatcher, OutgoingMessage};
use crate::services::documents::sources::{list_images, merge_with_global};
use crate::services::documents::{document_file_name, metadata, DocumentBuilder, RenderRequest};

pub struct FolderPipeline<'a> {
    snapshot: &'a ConfigSnapshot,
    layout: &'a Layout,
    builder: &'a dyn DocumentBuilder,
    dispatcher: &'a Dispatcher,
    archiver: &'a Archiver,
    composer: MessageComposer,
    log: ActivityLog,
}

/// What the build stage hands to the later stages.
struct Built {
    document: PathBuf,
    /// Folder images present at build time, archived once dispatch succeeds.
    folder_images: Vec<PathBuf>,
}

impl<'a> FolderPipeline<'a> {
    pub fn new(
        snapshot: &'a ConfigSnapshot,
        layout: &'a Layout,
        builder: &'a dyn DocumentBuilder,
        dispatcher: &'a Dispatcher,
        archiver: &'a Archiver,
        log: ActivityLog,
    ) -> Self {
        let settings = &snapshot.settings;
        Self {
            snapshot,
            layout,
            builder,
            dispatcher,
            archiver,
            composer: MessageComposer::new(
                settings.processing.date_format.clone(),
                settings.email.sender_name.clone(),
            ),
            log,
        }
    }

    pub fn run(&self, folder: &str) -> FolderOutcome {
        let mut outcome = FolderOutcome::start(folder);
        self.log.summary(format!("Processing folder: {folder}"));

        let Some(document_name) = self.snapshot.document_for(folder) else {
            outcome.fail(format!("no document configured for folder {folder}"));
            return self.finish(outcome);
        };
        outcome.document_name = Some(document_name.to_string());

        let Some(built) = self.build(folder, document_name, &mut outcome) else {
            return self.finish(outcome);
        };
        if !self.validate_size(&built.document, &mut outcome) {
            return self.finish(outcome);
        }
        if !self.dispatch(folder, document_name, &built.document, &mut outcome) {
            if outcome.stage == PipelineStage::Dispatched {
                outcome.stage = PipelineStage::SkippedArchive;
            }
            self.log.warn(format!(
                "Archiving skipped for {folder}; images and {} retained for retry",
                built.document.display()
            ));
            return self.finish(outcome);
        }
        if self.archive(folder, &built, &mut outcome) {
            outcome.stage = PipelineStage::Done;
        }
        self.finish(outcome)
    }

    fn build(&self, folder: &str, document_name: &str, outcome: &mut FolderOutcome) -> Option<Built> {
        let extensions = &self.snapshot.settings.processing.image_extensions;
        let listed = list_images(&self.layout.folder_dir(folder), extensions).and_then(|own| {
            list_images(&self.layout.folder_dir(self.snapshot.global_folder()), extensions)
                .map(|global| (own, global))
        });
        let (folder_images, global_images) = match listed {
            Ok(lists) => lists,
            Err(err) => {
                self.log.failure(format!("Image discovery failed for {folder}"), &err);
                outcome.fail(format!("image discovery failed: {err}"));
                return None;
            }
        };

        let images = merge_with_global(global_images, folder_images.clone());
        if images.is_empty() {
            self.log
                .file_op(format!("No images found for folder: {folder}"));
            return None;
        }

        let timestamp = Local::now()
            .format(&self.snapshot.settings.processing.timestamp_format)
            .to_string();
        let output_dir = self.layout.output_dir();
        if let Err(err) = fs::create_dir_all(&output_dir) {
            self.log.failure("Failed to create output directory", &err);
            outcome.fail(format!("build failed: {err}"));
            return None;
        }
        let document = output_dir.join(document_file_name(document_name, &timestamp));

        let rendered = self
            .builder
            .render(&RenderRequest {
                document_name,
                source_folder: folder,
                images: &images,
                destination: &document,
            })
            .and_then(|meta| metadata::write(&document, &meta).map_err(Into::into));
        if let Err(err) = rendered {
            self.log.failure(format!("Failed to build document for {folder}"), &err);
            outcome.fail(format!("build failed: {err}"));
            return None;
        }

        let global_count = images
            .iter()
            .filter(|i| i.origin == ImageOrigin::Global)
            .count();
        self.log.file_op(format!(
            "Document built: {} ({global_count} global + {} {folder} files, {} total)",
            document.display(),
            images.len() - global_count,
            images.len()
        ));

        outcome.document_built = true;
        outcome.document_path = Some(document.clone());
        outcome.stage = PipelineStage::Built;
        Some(Built {
            document,
            folder_images,
        })
    }

    fn validate_size(&self, document: &Path, outcome: &mut FolderOutcome) -> bool {
        let limit = self.snapshot.max_attachment_bytes();
        let size = match fs::metadata(document) {
            Ok(meta) => meta.len(),
            Err(err) => {
                self.log.failure("Failed to read document size", &err);
                outcome.fail(format!("size check failed: {err}"));
                return false;
            }
        };
        if size > limit {
            let message = format!(
                "document size {:.2} MB exceeds limit of {} MB",
                size as f64 / 1024.0 / 1024.0,
                self.snapshot.settings.general.max_attachment_size_mb
            );
            self.log.error(format!("{}: {message}", document.display()));
            outcome.fail(message);
            return false;
        }
        outcome.stage = PipelineStage::SizeValidated;
        true
    }

    /// Sends to every entry of the document; true only if all went out.
    fn dispatch(
        &self,
        folder: &str,
        document_name: &str,
        document: &Path,
        outcome: &mut FolderOutcome,
    ) -> bool {
        let entries: Vec<_> = self.snapshot.entries_for(document_name).collect();
        if entries.is_empty() {
            self.log
                .error(format!("No recipient entries for document {document_name}"));
            outcome.fail(format!("no recipient entries for {document_name}"));
            return false;
        }

        let meta = metadata::read(document).unwrap_or_else(|err| {
            self.log.failure("Failed to read document metadata", &err);
            DocumentMetadata::placeholder(document_name, folder)
        });
        let now = Local::now();
        let body = self.composer.body(&meta, now);

        let mut succeeded = 0;
        for entry in &entries {
            let message = OutgoingMessage {
                to: entry.recipients.clone(),
                cc: entry.cc.clone(),
                subject: self.composer.subject(&entry.subject_template, now),
                body: body.clone(),
                attachment: Some(document.to_path_buf()),
            };
            match self.dispatcher.send(&message) {
                Ok(_) => succeeded += 1,
                Err(err) => self.log.failure(
                    format!("Failed to send {document_name} to {}", entry.recipients.join("; ")),
                    &err,
                ),
            }
        }

        outcome.entries_attempted = entries.len();
        outcome.entries_succeeded = succeeded;
        outcome.stage = PipelineStage::Dispatched;
        self.log.email(format!(
            "Email sending completed for {document_name}: {succeeded}/{} successful",
            entries.len()
        ));

        if succeeded == entries.len() {
            outcome.dispatch_succeeded = true;
            true
        } else {
            outcome.fail(format!(
                "dispatch failed for {} of {} entries",
                entries.len() - succeeded,
                entries.len()
            ));
            false
        }
    }

    fn archive(&self, folder: &str, built: &Built, outcome: &mut FolderOutcome) -> bool {
        if !self.archiver.is_enabled() {
            outcome.stage = PipelineStage::SkippedArchive;
            return true;
        }
        let now = Local::now();
        let images = self
            .archiver
            .archive_folder_images(folder, &built.folder_images, now);
        let document = self.archiver.archive_document(&built.document, now);

        match (images, document) {
            (Ok(_), Ok(_)) => {
                outcome.archived = true;
                outcome.stage = PipelineStage::Archived;
                true
            }
            (Err(err), _) | (_, Err(err)) => {
                self.log.failure(format!("Archiving failed for {folder}"), &err);
                outcome.fail(format!("archive failed: {err}"));
                false
            }
        }
    }

    fn finish(&self, outcome: FolderOutcome) -> FolderOutcome {
        let outcome = outcome.finish();
        if outcome.had_no_work() {
            self.log
                .summary(format!("Folder {}: nothing to do", outcome.folder_id));
        } else {
            self.log.summary(format!(
                "Folder {}: built={} dispatched={} archived={}{}",
                outcome.folder_id,
                outcome.document_built,
                outcome.dispatch_succeeded,
                outcome.archived,
                outcome
                    .error
                    .as_deref()
                    .map(|e| format!(" error={e}"))
                    .unwrap_or_default()
            ));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::mappings::RecipientEntry;
    use crate::config::settings::{ProcessingSettings, Settings};
    use crate::services::dispatch::{DispatchError, Transport};
    use crate::services::documents::{BuildError, SourceImage};
    use chrono::Utc;
    use common::model::document::ImageRecord;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Writes a small file and reports one record per image.
    struct FakeBuilder {
        rendered: RefCell<Vec<Vec<SourceImage>>>,
        fail: bool,
        size: usize,
    }

    impl FakeBuilder {
        fn new() -> Self {
            Self {
                rendered: RefCell::new(Vec::new()),
                fail: false,
                size: 16,
            }
        }
    }

    impl DocumentBuilder for FakeBuilder {
        fn render(&self, request: &RenderRequest<'_>) -> Result<DocumentMetadata, BuildError> {
            self.rendered.borrow_mut().push(request.images.to_vec());
            if self.fail {
                return Err(BuildError::NoImages);
            }
            fs::write(request.destination, vec![b'%'; self.size]).unwrap();
            Ok(DocumentMetadata {
                document_name: request.document_name.to_string(),
                source_folder: request.source_folder.to_string(),
                created_at: Utc::now(),
                images: request
                    .images
                    .iter()
                    .map(|i| ImageRecord {
                        filename: i.file_name(),
                        created_at: Utc::now(),
                        width: 10,
                        height: 10,
                        size_bytes: 1,
                        origin: i.origin,
                    })
                    .collect(),
            })
        }
    }

    /// Refuses any message addressed to a `fail@` recipient.
    struct FakeTransport {
        sent: Rc<RefCell<Vec<OutgoingMessage>>>,
    }

    impl Transport for FakeTransport {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn send(&self, message: &OutgoingMessage) -> Result<(), DispatchError> {
            if message.to.iter().any(|a| a.starts_with("fail@")) {
                return Err(DispatchError::Build("rejected".to_string()));
            }
            self.sent.borrow_mut().push(message.clone());
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        layout: Layout,
        snapshot: ConfigSnapshot,
        sent: Rc<RefCell<Vec<OutgoingMessage>>>,
    }

    impl Fixture {
        fn new(entries: Vec<RecipientEntry>) -> Self {
            let dir = TempDir::new().unwrap();
            let layout = Layout::new(dir.path());
            layout.ensure_runtime_dirs().unwrap();
            let snapshot = ConfigSnapshot {
                settings: Settings::from_toml_str(crate::config::tests::SETTINGS).unwrap(),
                folder_to_document: [
                    ("A".to_string(), "Report-A".to_string()),
                    ("ALL".to_string(), "Global Headers".to_string()),
                ]
                .into_iter()
                .collect(),
                entries,
                admin_emails: vec!["ops@example.com".to_string()],
                unaddressed_documents: Default::default(),
            };
            Self {
                _dir: dir,
                layout,
                snapshot,
                sent: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn image(&self, folder: &str, name: &str) -> PathBuf {
            let dir = self.layout.folder_dir(folder);
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            fs::write(&path, folder.as_bytes()).unwrap();
            path
        }

        fn run(&self, builder: &FakeBuilder) -> FolderOutcome {
            let dispatcher = Dispatcher::new(
                vec![Box::new(FakeTransport { sent: self.sent.clone() })],
                ActivityLog::new("dispatch"),
            );
            let archiver = Archiver::new(
                &self.layout,
                &self.snapshot.settings.processing,
                ActivityLog::new("archiver"),
            );
            FolderPipeline::new(
                &self.snapshot,
                &self.layout,
                builder,
                &dispatcher,
                &archiver,
                ActivityLog::new("pipeline"),
            )
            .run("A")
        }

        fn outputs(&self) -> usize {
            fs::read_dir(self.layout.output_dir())
                .unwrap()
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|x| x == "pdf"))
                .count()
        }
    }

    fn entry(recipients: &[&str]) -> RecipientEntry {
        RecipientEntry {
            document: "Report-A".to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            cc: Vec::new(),
            subject_template: "Report-A [DATE]".to_string(),
        }
    }

    #[test]
    fn successful_folder_is_built_sent_and_archived() {
        let fx = Fixture::new(vec![entry(&["a@example.com", "b@example.com"])]);
        let image = fx.image("A", "chart.png");

        let outcome = fx.run(&FakeBuilder::new());

        assert!(outcome.document_built);
        assert!(outcome.dispatch_succeeded);
        assert!(outcome.archived);
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.stage, PipelineStage::Done);
        assert!(!image.exists());
        assert_eq!(fx.outputs(), 0);

        let sent = fx.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@example.com", "b@example.com"]);
        assert!(!sent[0].subject.contains("[DATE]"));
        assert!(sent[0].body.contains("chart.png"));
    }

    #[test]
    fn empty_folder_short_circuits_without_error() {
        let fx = Fixture::new(vec![entry(&["a@example.com"])]);
        let builder = FakeBuilder::new();
        let outcome = fx.run(&builder);

        assert!(outcome.had_no_work());
        assert_eq!(outcome.stage, PipelineStage::Start);
        assert!(builder.rendered.borrow().is_empty());
        assert!(fx.sent.borrow().is_empty());
    }

    #[test]
    fn build_failure_stops_the_folder() {
        let fx = Fixture::new(vec![entry(&["a@example.com"])]);
        let image = fx.image("A", "chart.png");
        let mut builder = FakeBuilder::new();
        builder.fail = true;

        let outcome = fx.run(&builder);
        assert!(!outcome.document_built);
        assert!(outcome.error.unwrap().starts_with("build failed"));
        assert!(fx.sent.borrow().is_empty());
        assert!(image.exists());
    }

    #[test]
    fn oversized_document_is_not_sent() {
        let mut fx = Fixture::new(vec![entry(&["a@example.com"])]);
        fx.snapshot.settings.general.max_attachment_size_mb = 0;
        fx.image("A", "chart.png");

        let outcome = fx.run(&FakeBuilder::new());
        assert!(outcome.document_built);
        assert_eq!(outcome.stage, PipelineStage::Built);
        assert!(outcome.error.unwrap().contains("exceeds limit"));
        assert!(fx.sent.borrow().is_empty());
        assert_eq!(fx.outputs(), 1);
    }

    #[test]
    fn partial_dispatch_failure_keeps_inputs_for_retry() {
        let fx = Fixture::new(vec![entry(&["a@example.com"]), entry(&["fail@example.com"])]);
        let image = fx.image("A", "chart.png");

        let first = fx.run(&FakeBuilder::new());
        assert!(first.document_built);
        assert!(!first.dispatch_succeeded);
        assert!(!first.archived);
        assert_eq!(first.stage, PipelineStage::SkippedArchive);
        assert_eq!(first.entries_attempted, 2);
        assert_eq!(first.entries_succeeded, 1);
        assert_eq!(
            first.error.as_deref(),
            Some("dispatch failed for 1 of 2 entries")
        );
        assert!(image.exists());
        let document = first.document_path.clone().unwrap();
        assert!(document.exists());
        assert!(metadata::sidecar_path(&document).exists());

        // Same inputs, same stages, no complaints about what is already there.
        let second = fx.run(&FakeBuilder::new());
        assert!(second.document_built);
        assert_eq!(second.entries_attempted, 2);
        assert!(!second.archived);
        assert!(image.exists());
    }

    #[test]
    fn global_image_replaces_folder_image_of_same_name() {
        let fx = Fixture::new(vec![entry(&["a@example.com"])]);
        let global = fx.image("ALL", "X.png");
        fx.image("A", "X.png");
        fx.image("A", "Y.png");
        let builder = FakeBuilder::new();

        let outcome = fx.run(&builder);
        assert!(outcome.archived);

        let rendered = builder.rendered.borrow();
        let pages: Vec<_> = rendered[0].iter().map(|i| i.path.clone()).collect();
        assert_eq!(pages.iter().filter(|p| p.ends_with("X.png")).count(), 1);
        assert_eq!(pages[0], global);
        // Global images serve every folder and are never archived.
        assert!(global.exists());
        assert!(!fx.layout.folder_dir("A").join("X.png").exists());
    }

    #[test]
    fn document_without_entries_fails() {
        let fx = Fixture::new(Vec::new());
        fx.image("A", "chart.png");
        let outcome = fx.run(&FakeBuilder::new());
        assert!(!outcome.dispatch_succeeded);
        assert!(outcome.error.unwrap().starts_with("no recipient entries"));
    }

    #[test]
    fn disabled_archiving_completes_without_moving_files() {
        let mut fx = Fixture::new(vec![entry(&["a@example.com"])]);
        fx.snapshot.settings.processing = ProcessingSettings {
            archive_after_processing: false,
            ..ProcessingSettings::default()
        };
        let image = fx.image("A", "chart.png");

        let outcome = fx.run(&FakeBuilder::new());
        assert!(outcome.dispatch_succeeded);
        assert!(!outcome.archived);
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.stage, PipelineStage::Done);
        assert!(image.exists());
    }
}
