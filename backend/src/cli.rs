//! Command line surface: `run` (default), `diagnostics` and `folder:<name>`.

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::ConfigStore;
use crate::error::AppError;
use crate::job_controller::coordinator::RunCoordinator;
use crate::job_controller::lock::release_if_owned;
use crate::logging::{self, ActivityLog};
use crate::paths::Layout;
use crate::services::diagnostics::{render_text, Diagnostics};
use crate::services::dispatch::Dispatcher;
use crate::services::documents::pdf::PdfRenderer;

pub const USAGE: &str = "Usage: bimailer [run|diagnostics|folder:FOLDER_NAME]";

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "bimailer",
    version,
    about = "Turns folders of images into documents and mails them"
)]
pub struct Cli {
    /// Root holding Input/, Output/, Archive/, Logs/ and Config/.
    #[arg(long, value_name = "DIR", env = "BIMAILER_BASE_DIR", default_value = ".")]
    pub base_dir: PathBuf,
    /// Configuration directory (default: <base-dir>/Config).
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,
    /// run, diagnostics or folder:<name>.
    #[arg(default_value = "run")]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Diagnostics,
    Folder(String),
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.to_ascii_lowercase();
        if lowered == "run" {
            return Ok(Command::Run);
        }
        if lowered == "diagnostics" {
            return Ok(Command::Diagnostics);
        }
        if lowered.starts_with("folder:") {
            let name = raw["folder:".len()..].trim();
            if !name.is_empty() {
                return Ok(Command::Folder(name.to_string()));
            }
        }
        Err(AppError::UnknownCommand(raw.to_string()))
    }
}

impl Cli {
    pub fn layout(&self) -> Layout {
        let layout = Layout::new(&self.base_dir);
        match &self.config_dir {
            Some(dir) => layout.with_config_dir(dir),
            None => layout,
        }
    }
}

/// Process entry point. Returns the exit code.
pub fn main() -> i32 {
    let cli = Cli::parse();
    match execute(&cli) {
        Ok(code) => code,
        Err(err) => report(&err, &ActivityLog::new("cli")),
    }
}

/// Logs a command failure and maps it to the exit code. A busy lock means
/// another run is in progress, which is not an error of this one.
fn report(err: &AppError, log: &ActivityLog) -> i32 {
    match err {
        AppError::UnknownCommand(command) => {
            eprintln!("Unknown command `{command}`");
            eprintln!("{USAGE}");
        }
        err if err.is_busy() => {
            log.summary(format!("Processing skipped: {err}"));
            eprintln!("{err}");
        }
        err => {
            log.failure("Critical error in BIMailer", err);
            eprintln!("Critical error in BIMailer: {err}");
        }
    }
    EXIT_FAILURE
}

pub fn execute(cli: &Cli) -> Result<i32, AppError> {
    let command: Command = cli.command.parse()?;
    let layout = cli.layout();
    match command {
        Command::Diagnostics => {
            logging::init(None);
            diagnostics(&layout, cli.json)
        }
        Command::Run => {
            let coordinator = prepare(&layout)?;
            let summary = coordinator.run_all()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "BIMailer processing completed: {}/{} folders processed successfully",
                    summary.dispatches_succeeded(),
                    summary.folders_processed()
                );
            }
            Ok(if summary.all_dispatched() {
                EXIT_OK
            } else {
                EXIT_FAILURE
            })
        }
        Command::Folder(name) => {
            let coordinator = prepare(&layout)?;
            let outcome = coordinator.run_folder(&name)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            match &outcome.error {
                Some(error) => {
                    if !cli.json {
                        println!("Error processing folder {name}: {error}");
                    }
                    Ok(EXIT_FAILURE)
                }
                None => {
                    if !cli.json {
                        println!("Successfully processed folder: {name}");
                    }
                    Ok(EXIT_OK)
                }
            }
        }
    }
}

fn diagnostics(layout: &Layout, json: bool) -> Result<i32, AppError> {
    let report = Diagnostics::new(layout, ActivityLog::new("diagnostics")).run();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text(&report));
    }
    Ok(if report.healthy { EXIT_OK } else { EXIT_FAILURE })
}

/// Creates the runtime directories, installs logging, loads the configuration
/// and wires the coordinator together. The interrupt handler is installed last
/// so it knows where the lock marker lives.
fn prepare(layout: &Layout) -> Result<RunCoordinator, AppError> {
    layout
        .ensure_runtime_dirs()
        .map_err(|source| AppError::Prepare {
            path: layout.base().to_path_buf(),
            source,
        })?;
    logging::init(Some(layout.logs_dir().as_path()));

    let log = ActivityLog::new("coordinator");
    log.summary("BIMailer system starting up");
    let snapshot = ConfigStore::new(layout.config_dir(), log.scoped("config")).load()?;

    let settings = &snapshot.settings;
    let renderer = PdfRenderer::new(log.scoped("renderer"));
    let dispatcher = Dispatcher::from_settings(&settings.email, log.scoped("dispatch"));
    let admin_dispatcher = Dispatcher::from_settings(&settings.email, log.scoped("dispatch"));
    let coordinator = RunCoordinator::new(
        snapshot,
        layout.clone(),
        Box::new(renderer),
        dispatcher,
        admin_dispatcher,
        log.clone(),
    );

    let lock_path = coordinator.lock().path().to_path_buf();
    ctrlc::set_handler(move || {
        release_if_owned(&lock_path);
        eprintln!("\nBIMailer processing interrupted by user");
        std::process::exit(EXIT_INTERRUPTED);
    })?;

    log.summary("BIMailer system initialized successfully");
    Ok(coordinator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::write_config;
    use crate::job_controller::coordinator::RunError;
    use crate::job_controller::lock::LockError;
    use crate::logging::Channel;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn commands_parse() {
        assert_eq!("run".parse::<Command>().unwrap(), Command::Run);
        assert_eq!("Diagnostics".parse::<Command>().unwrap(), Command::Diagnostics);
        assert_eq!(
            "folder:Sales Team".parse::<Command>().unwrap(),
            Command::Folder("Sales Team".to_string())
        );
        assert!(matches!(
            "folder:".parse::<Command>(),
            Err(AppError::UnknownCommand(_))
        ));
        assert!(matches!(
            "status".parse::<Command>(),
            Err(AppError::UnknownCommand(c)) if c == "status"
        ));
    }

    #[test]
    fn arguments_default_to_run_in_current_directory() {
        let cli = Cli::try_parse_from(["bimailer"]).unwrap();
        assert_eq!(cli.command, "run");
        assert!(!cli.json);
        let layout = cli.layout();
        assert_eq!(layout.config_dir(), Path::new("./Config"));

        let cli = Cli::try_parse_from([
            "bimailer",
            "--base-dir",
            "/srv/mailer",
            "--config-dir",
            "/etc/mailer",
            "--json",
            "diagnostics",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.layout().config_dir(), Path::new("/etc/mailer"));
        assert_eq!(cli.layout().input_dir(), Path::new("/srv/mailer/Input"));
    }

    #[test]
    fn busy_lock_is_reported_without_an_error() {
        let log = ActivityLog::capturing("cli");
        let busy = AppError::Run(RunError::Lock(LockError::Busy {
            owner_id: 4242,
            acquired_at: chrono::Utc::now(),
        }));
        assert_eq!(report(&busy, &log), EXIT_FAILURE);
        let records = log.captured();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channel, Channel::Summary);
        assert!(records[0].message.contains("4242"));

        let log = ActivityLog::capturing("cli");
        let missing = AppError::Run(RunError::UnknownFolder("Z".to_string()));
        assert_eq!(report(&missing, &log), EXIT_FAILURE);
        assert_eq!(log.captured()[0].channel, Channel::Errors);
    }

    #[test]
    fn diagnostics_exit_code_follows_health() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from(["bimailer", "--base-dir", &base, "diagnostics"]).unwrap();
        assert_eq!(execute(&cli).unwrap(), EXIT_FAILURE);

        let layout = cli.layout();
        write_config(
            layout.config_dir(),
            "FolderName,PDFName\nA,Report-A\n",
            "PDFName,Recipients,Subject\nReport-A,a@example.com,Weekly\n",
        );
        fs::create_dir_all(layout.input_dir()).unwrap();
        layout.ensure_runtime_dirs().unwrap();
        assert_eq!(execute(&cli).unwrap(), EXIT_OK);
    }
}
