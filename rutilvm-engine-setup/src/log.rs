use anyhow::{Context, Result, bail, format_err};
use log::{Level, LevelFilter, Metadata, Record};
use std::{
    fs::{self, File},
    io::Write,
    path::Path,
    sync::{Mutex, OnceLock},
};

pub struct SetupLogger;
static LOGFILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOGGER: SetupLogger = SetupLogger;

impl SetupLogger {
    pub fn init(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("could not create log directory {}", dir.display()))?;
        }

        let f = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("could not open log file {}", path.display()))?;
        if LOGFILE.set(Mutex::new(f)).is_err() {
            bail!("Cannot set LOGFILE")
        }
        Ok(())
    }
}

impl log::Log for SetupLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    /// Logs into the log file, warnings and errors are also shown on stderr
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if record.level() <= Level::Warn {
            eprintln!("{}: {}", record.level(), record.args());
        }

        if let Some(Ok(mut file)) = LOGFILE.get().map(Mutex::lock) {
            // nowhere left to report a failing log write to
            let _ = writeln!(file, "{}: {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        if let Some(Ok(mut file)) = LOGFILE.get().map(Mutex::lock) {
            let _ = file.flush();
        }
    }
}

/// Sets up [`SetupLogger`] as the global logger, writing to `path`.
pub fn init_log(path: &Path) -> Result<()> {
    SetupLogger::init(path)?;
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Info))
        .map_err(|err| format_err!(err))
}
