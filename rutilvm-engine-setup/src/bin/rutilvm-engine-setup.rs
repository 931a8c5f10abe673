use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use rutilvm_engine_setup::{
    deploy::{backup_answer_file, deploy},
    lock::SessionLock,
    log::init_log,
    select::TerminalPrompt,
    settings::Settings,
    system::HostSystem,
    wizard::{Outcome, SetupSession, run},
};
use rutilvm_installer_common::{DEFAULT_LOG_FILE, DEFAULT_SETTINGS_FILE, SESSION_LOCK_FILE};

/// Exit status when the operator cancels the setup.
const EXIT_ABORTED: u8 = 2;

/// Interactive assistant preparing the answer file for a RutilVM hosted-engine deployment and
/// starting the deployment with it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file with site defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the answer file, overrides the settings file
    #[arg(long)]
    answer_file: Option<PathBuf>,

    /// Log file to write to
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Only write the answer file, do not start the deployment
    #[arg(long, default_value_t = false)]
    no_deploy: bool,
}

fn setup(args: &Cli) -> Result<Outcome> {
    let _lock = SessionLock::acquire(Path::new(SESSION_LOCK_FILE))?;

    let settings = match &args.config {
        Some(path) => Settings::load(path, true)?,
        None => Settings::load(Path::new(DEFAULT_SETTINGS_FILE), false)?,
    };

    let answer_path = args
        .answer_file
        .clone()
        .unwrap_or_else(|| settings.answer_file.clone());
    backup_answer_file(&answer_path)?;

    let mut session = SetupSession::new(settings, Some(answer_path.clone()));
    let outcome = run(&mut session, &mut TerminalPrompt, &mut HostSystem)?;

    if outcome == Outcome::Done {
        if args.no_deploy {
            info!("Not starting the deployment, answer file is at {}", answer_path.display());
        } else {
            deploy(&answer_path)?;
        }
    }

    Ok(outcome)
}

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(err) = init_log(&args.log_file) {
        eprintln!("could not initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }
    info!("Starting RutilVM engine setup");

    match setup(&args) {
        Ok(Outcome::Done) => {
            info!("Engine setup finished");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Aborted) => {
            info!("Engine setup aborted, partial answer file left in place");
            ExitCode::from(EXIT_ABORTED)
        }
        Err(err) => {
            error!("Engine setup failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
