//! Authenticated SMTP submission.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as _};
use std::fs;
use std::time::Duration;

use super::{DispatchError, OutgoingMessage, Transport};
use crate::config::settings::EmailSettings;
use crate::logging::ActivityLog;

/// How the connection to the server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (SMTPS).
    Implicit,
    StartTls,
    Plain,
}

impl Security {
    pub fn for_settings(settings: &EmailSettings) -> Self {
        if settings.implicit_tls() {
            Security::Implicit
        } else if settings.use_tls {
            Security::StartTls
        } else {
            Security::Plain
        }
    }
}

pub struct SmtpMailer {
    settings: EmailSettings,
    log: ActivityLog,
}

impl SmtpMailer {
    pub fn new(settings: EmailSettings, log: ActivityLog) -> Self {
        Self { settings, log }
    }

    fn transport(&self) -> Result<SmtpTransport, DispatchError> {
        let server = self.settings.smtp_server.as_str();
        let builder = match Security::for_settings(&self.settings) {
            Security::Implicit => SmtpTransport::relay(server)?,
            Security::StartTls => SmtpTransport::starttls_relay(server)?,
            Security::Plain => SmtpTransport::builder_dangerous(server),
        };
        Ok(builder
            .port(self.settings.smtp_port)
            .credentials(Credentials::new(
                self.settings.smtp_username.clone(),
                self.settings.smtp_password.clone(),
            ))
            .timeout(Some(Duration::from_secs(self.settings.timeout_secs)))
            .build())
    }

    pub fn build_message(&self, message: &OutgoingMessage) -> Result<Message, DispatchError> {
        let from = Mailbox::new(
            Some(self.settings.sender_name.clone()),
            parse_address(&self.settings.smtp_username)?.email,
        );
        let mut builder = Message::builder().from(from).subject(message.subject.as_str());
        for to in &message.to {
            builder = builder.to(parse_address(to)?);
        }
        for cc in &message.cc {
            builder = builder.cc(parse_address(cc)?);
        }

        let text = SinglePart::plain(message.body.clone());
        let built = match &message.attachment {
            Some(path) => {
                let content = fs::read(path).map_err(|source| DispatchError::Attachment {
                    path: path.clone(),
                    source,
                })?;
                let mime = mime_guess::from_path(path).first_or_octet_stream();
                let content_type = ContentType::parse(mime.as_ref())
                    .map_err(|e| DispatchError::Build(e.to_string()))?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "attachment".to_string());
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(text)
                        .singlepart(Attachment::new(filename).body(content, content_type)),
                )
            }
            None => builder.singlepart(text),
        };
        built.map_err(|e| DispatchError::Build(e.to_string()))
    }
}

impl Transport for SmtpMailer {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn send(&self, message: &OutgoingMessage) -> Result<(), DispatchError> {
        let email = self.build_message(message)?;
        let transport = self.transport()?;
        transport.send(&email)?;
        self.log.email(format!(
            "SMTP delivery to {}:{} accepted ({} recipients, {} cc)",
            self.settings.smtp_server,
            self.settings.smtp_port,
            message.to.len(),
            message.cc.len()
        ));
        Ok(())
    }
}

fn parse_address(address: &str) -> Result<Mailbox, DispatchError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| DispatchError::Address {
            address: address.to_string(),
            message: e.to_string(),
        })
}
