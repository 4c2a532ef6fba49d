//! Sending a document to one recipient group.
//!
//! A [`Dispatcher`] holds an ordered list of [`Transport`] strategies and
//! tries them in turn until one accepts the message.

pub mod compose;
pub mod mailto;
pub mod smtp;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::settings::{EmailSettings, TransportKind};
use crate::logging::ActivityLog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no transport configured")]
    NoTransport,
    #[error("invalid address `{address}`: {message}")]
    Address { address: String, message: String },
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("failed to open mail client: {0}")]
    Handoff(#[source] io::Error),
    #[error("all transports failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

pub trait Transport {
    fn name(&self) -> &'static str;
    fn send(&self, message: &OutgoingMessage) -> Result<(), DispatchError>;
}

pub struct Dispatcher {
    transports: Vec<Box<dyn Transport>>,
    log: ActivityLog,
}

impl Dispatcher {
    pub fn new(transports: Vec<Box<dyn Transport>>, log: ActivityLog) -> Self {
        Self { transports, log }
    }

    /// Builds the chain named by the email settings, in order.
    pub fn from_settings(settings: &EmailSettings, log: ActivityLog) -> Self {
        let transports = settings
            .transport_chain()
            .into_iter()
            .map(|kind| -> Box<dyn Transport> {
                match kind {
                    TransportKind::Smtp => {
                        Box::new(smtp::SmtpMailer::new(settings.clone(), log.scoped("smtp")))
                    }
                    TransportKind::Mailto => {
                        Box::new(mailto::MailClientHandoff::new(log.scoped("mailto")))
                    }
                }
            })
            .collect();
        Self::new(transports, log)
    }

    /// Sends through the first transport that accepts the message and returns
    /// its name.
    pub fn send(&self, message: &OutgoingMessage) -> Result<&'static str, DispatchError> {
        if self.transports.is_empty() {
            return Err(DispatchError::NoTransport);
        }

        let mut failures = Vec::new();
        for transport in &self.transports {
            match transport.send(message) {
                Ok(()) => {
                    self.log.email(format!(
                        "Sent `{}` to {} via {}",
                        message.subject,
                        message.to.join("; "),
                        transport.name()
                    ));
                    return Ok(transport.name());
                }
                Err(err) => {
                    self.log
                        .failure(format!("{} transport failed", transport.name()), &err);
                    failures.push(format!("{}: {err}", transport.name()));
                }
            }
        }
        Err(DispatchError::Exhausted(failures))
    }
}
