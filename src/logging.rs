use simplelog::*;
use std::fs::{self, OpenOptions};
use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Where log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// `~/.local/share/phaselock/logs/app.log`, leaving the terminal to the
    /// status display
    File,
    /// stderr through env_logger, filtered by `RUST_LOG`
    Stderr,
}

pub fn log_dir() -> Result<PathBuf, Error> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::new(ErrorKind::NotFound, "HOME environment variable not set"))?;

    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("phaselock")
        .join("logs"))
}

pub fn init_logger(target: LogTarget) -> Result<(), Error> {
    match target {
        LogTarget::File => init_file_logger(),
        LogTarget::Stderr => {
            INIT.call_once(|| {
                if env_logger::Builder::from_env(
                    env_logger::Env::default().default_filter_or("info"),
                )
                .try_init()
                .is_ok()
                {
                    LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
                }
            });
            initialized()
        }
    }
}

fn init_file_logger() -> Result<(), Error> {
    let log_dir = log_dir()?;
    fs::create_dir_all(&log_dir)?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("app.log"))?;

    INIT.call_once(|| {
        let config = ConfigBuilder::new()
            .set_thread_level(LevelFilter::Debug)
            .build();
        if CombinedLogger::init(vec![WriteLogger::new(LevelFilter::Debug, config, log_file)])
            .is_ok()
        {
            LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
        }
    });
    initialized()
}

fn initialized() -> Result<(), Error> {
    if LOGGER_INITIALIZED.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Other, "Logger initialization failed"))
    }
}
