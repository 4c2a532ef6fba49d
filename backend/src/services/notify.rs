//! Administrator notifications: the run summary and critical errors.

use chrono::{DateTime, Local};
use common::jobs::RunSummary;
use std::fmt::Write as _;

use crate::config::settings::AdminSettings;
use crate::config::ConfigSnapshot;
use crate::logging::ActivityLog;
use crate::services::dispatch::{Dispatcher, OutgoingMessage};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Summary,
    Error,
}

pub struct AdminNotifier {
    settings: AdminSettings,
    recipients: Vec<String>,
    dispatcher: Dispatcher,
    log: ActivityLog,
}

impl AdminNotifier {
    pub fn new(snapshot: &ConfigSnapshot, dispatcher: Dispatcher, log: ActivityLog) -> Self {
        Self {
            settings: snapshot.settings.admin.clone(),
            recipients: snapshot.admin_emails.clone(),
            dispatcher,
            log,
        }
    }

    fn enabled(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Summary => self.settings.send_summary_email,
            NotificationKind::Error => self.settings.send_error_notifications,
        }
    }

    /// Sends unless this kind is switched off. A disabled kind counts as sent.
    pub fn notify(&self, kind: NotificationKind, subject: &str, body: &str) -> bool {
        if !self.enabled(kind) {
            return true;
        }
        if self.recipients.is_empty() {
            self.log.error("No admin emails configured for notifications");
            return false;
        }

        let message = OutgoingMessage {
            to: self.recipients.clone(),
            cc: Vec::new(),
            subject: subject.to_string(),
            body: body.to_string(),
            attachment: None,
        };
        match self.dispatcher.send(&message) {
            Ok(_) => {
                self.log.email(format!("Admin notification sent: {subject}"));
                true
            }
            Err(err) => {
                self.log
                    .failure(format!("Failed to send admin notification: {subject}"), &err);
                false
            }
        }
    }

    pub fn send_summary(&self, summary: &RunSummary) -> bool {
        let now = Local::now();
        self.notify(
            NotificationKind::Summary,
            &summary_subject(now),
            &summary_body(summary, now),
        )
    }

    pub fn send_error(&self, subject: &str, details: &str) -> bool {
        self.notify(
            NotificationKind::Error,
            subject,
            &error_body(details, Local::now()),
        )
    }
}

pub fn summary_subject(now: DateTime<Local>) -> String {
    format!("BIMailer Processing Summary - {}", now.format(TIMESTAMP_FORMAT))
}

pub fn summary_body(summary: &RunSummary, now: DateTime<Local>) -> String {
    let mark = |ok: bool| if ok { "✓" } else { "✗" };
    let errors: Vec<_> = summary.errors().collect();

    let mut body = format!(
        "BIMailer Processing Summary - {ts}\n\n\
         Processing completed at: {ts}\n\n\
         Summary:\n\
         - Folders processed: {}\n\
         - Documents built: {}\n\
         - Dispatches succeeded: {}\n\
         - Errors encountered: {}\n\n\
         Detailed Results:",
        summary.folders_processed(),
        summary.documents_built(),
        summary.dispatches_succeeded(),
        errors.len(),
        ts = now.format(TIMESTAMP_FORMAT),
    );
    for outcome in &summary.outcomes {
        let _ = write!(
            body,
            "\n  • {}: Document {}, Email {}, Archive {}",
            outcome.folder_id,
            mark(outcome.document_built),
            mark(outcome.dispatch_succeeded),
            mark(outcome.archived)
        );
    }
    if !errors.is_empty() {
        body.push_str("\n\nErrors:");
        for (folder, error) in errors {
            let _ = write!(body, "\n  • {folder}: {error}");
        }
    }
    body.push_str("\n\nFull logs available in the Logs directory.");
    body
}

pub fn error_body(details: &str, now: DateTime<Local>) -> String {
    format!(
        "A critical error occurred during BIMailer processing.\n\n\
         Time: {}\n\n\
         Error details:\n{details}\n\n\
         Please check the logs for more information.",
        now.format(TIMESTAMP_FORMAT)
    )
}
