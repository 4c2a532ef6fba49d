//! Hand-off to the local mail client through a `mailto:` link.
//!
//! The client cannot be told to attach a file, so the body gains manual
//! attachment instructions. Success only means the client was launched.

use std::io;

use super::compose::{mailto_url, with_attachment_instructions};
use super::{DispatchError, OutgoingMessage, Transport};
use crate::logging::ActivityLog;

type Opener = Box<dyn Fn(&str) -> io::Result<()>>;

pub struct MailClientHandoff {
    open: Opener,
    log: ActivityLog,
}

impl MailClientHandoff {
    pub fn new(log: ActivityLog) -> Self {
        Self::with_opener(Box::new(|url: &str| webbrowser::open(url)), log)
    }

    pub fn with_opener(open: Opener, log: ActivityLog) -> Self {
        Self { open, log }
    }
}

impl Transport for MailClientHandoff {
    fn name(&self) -> &'static str {
        "mailto"
    }

    fn send(&self, message: &OutgoingMessage) -> Result<(), DispatchError> {
        let body = match &message.attachment {
            Some(path) => with_attachment_instructions(&message.body, path),
            None => message.body.clone(),
        };
        let url = mailto_url(&message.to, &message.cc, &message.subject, &body);
        (self.open)(&url).map_err(DispatchError::Handoff)?;

        match &message.attachment {
            Some(path) => self.log.email(format!(
                "Email client opened with attachment instructions. File location: {}",
                path.display()
            )),
            None => self.log.email("Email client opened"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[test]
    fn opens_prefilled_link_with_instructions() {
        let opened = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = opened.clone();
        let handoff = MailClientHandoff::with_opener(
            Box::new(move |url: &str| {
                sink.lock().unwrap().push(url.to_string());
                Ok(())
            }),
            ActivityLog::new("mailto"),
        );

        handoff
            .send(&OutgoingMessage {
                to: vec!["a@example.com".to_string()],
                cc: Vec::new(),
                subject: "Report".to_string(),
                body: "Hello".to_string(),
                attachment: Some(PathBuf::from("/srv/out/report.pdf")),
            })
            .unwrap();

        let urls = opened.lock().unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with("mailto:a@example.com?subject=Report&body=Hello"));
        assert!(urls[0].contains("ATTACHMENT%20REQUIRED"));
        assert!(!urls[0].contains("&cc="));
    }

    #[test]
    fn launcher_failure_is_reported() {
        let handoff = MailClientHandoff::with_opener(
            Box::new(|_: &str| Err(io::Error::new(io::ErrorKind::NotFound, "no browser"))),
            ActivityLog::new("mailto"),
        );
        let err = handoff
            .send(&OutgoingMessage {
                to: vec!["a@example.com".to_string()],
                cc: Vec::new(),
                subject: "Report".to_string(),
                body: "Hello".to_string(),
                attachment: None,
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handoff(_)));
    }
}
