//! Folder-to-document mailer.
//!
//! Turns per-folder batches of images into paginated PDF documents, mails each
//! document to the recipient groups configured for it and archives what was
//! sent. A run is a single-instance batch job guarded by an on-disk lock.

pub mod cli;
pub mod config;
pub mod error;
pub mod job_controller;
pub mod logging;
pub mod paths;
pub mod services;
