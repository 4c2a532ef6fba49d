//! Scalar policy values from `settings.toml`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub email: EmailSettings,
    pub general: GeneralSettings,
    pub admin: AdminSettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Transport strategies a dispatch may go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Authenticated SMTP submission.
    Smtp,
    /// Hand the message to the local mail client through a `mailto:` link.
    Mailto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub use_default_mailer: bool,
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Explicit fallback order. Derived from `use_default_mailer` when absent.
    #[serde(default)]
    pub transports: Option<Vec<TransportKind>>,
}

impl EmailSettings {
    pub fn transport_chain(&self) -> Vec<TransportKind> {
        match &self.transports {
            Some(chain) => chain.clone(),
            None if self.use_default_mailer => vec![TransportKind::Mailto],
            None => vec![TransportKind::Smtp],
        }
    }

    /// Implicit TLS is used when asked for or when talking to the SMTPS port.
    pub fn implicit_tls(&self) -> bool {
        self.use_ssl || self.smtp_port == 465
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Retention for archived artifacts and log files.
    pub log_retention_days: u32,
    pub max_attachment_size_mb: u64,
    pub processing_lock_timeout_minutes: u32,
    /// Retention for rendered documents left behind in the output area.
    #[serde(default = "default_output_retention_days")]
    pub output_retention_days: u32,
}

impl GeneralSettings {
    pub fn max_attachment_bytes(&self) -> u64 {
        self.max_attachment_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSettings {
    /// `;`-separated administrator addresses.
    #[serde(default)]
    pub admin_emails: String,
    pub send_summary_email: bool,
    pub send_error_notifications: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub archive_after_processing: bool,
    #[serde(default)]
    pub override_existing_lock: bool,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    /// Pseudo-folder whose images are merged into every document.
    #[serde(default = "default_global_folder")]
    pub global_folder: String,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            archive_after_processing: true,
            override_existing_lock: false,
            date_format: default_date_format(),
            timestamp_format: default_timestamp_format(),
            global_folder: default_global_folder(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_sender_name() -> String {
    "Automated Reporting".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_output_retention_days() -> u32 {
    7
}

fn default_image_extensions() -> Vec<String> {
    vec![".png".to_string(), ".PNG".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d_%H-%M-%S".to_string()
}

fn default_global_folder() -> String {
    "ALL".to_string()
}
