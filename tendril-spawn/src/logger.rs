use std::path::Path;
use std::time::SystemTime;

use log::LevelFilter;
use parking_lot::Once;
use thiserror::Error;

use crate::config::SpawnConfig;

/// Global logger instance
/// Based on crate "fern"
pub struct GlobalLogger {}

static LOGGER_INITIALIZED: Once = Once::new();

#[derive(Debug, Error)]
pub enum GlobalLoggerError {
    #[error("Log adapter throwed an error: {0}")]
    LogAdapterError(#[from] fern::InitError),

    #[error("Log dispatcher already installed: {0}")]
    AlreadySet(#[from] log::SetLoggerError),
}

impl GlobalLogger {
    /// Installs the process-wide logger once. A logger that cannot be set up
    /// must never keep the library from loading, so failures are only reported
    /// on stderr.
    pub fn init(config: &SpawnConfig) {
        LOGGER_INITIALIZED.call_once(|| {
            if let Err(err) = GlobalLogger::setup(config.log_file.as_deref(), config.log_level) {
                eprintln!("tendril-spawn: failed to initialize logger: {err}");
            }
        });
    }

    fn setup(log_path: Option<&Path>, level_filter: LevelFilter) -> Result<(), GlobalLoggerError> {
        let mut dispatch = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{} {} {}] {}",
                    humantime::format_rfc3339_seconds(SystemTime::now()),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level_filter)
            .chain(std::io::stderr());

        // Appended, not truncated: every spawned process shares the file
        if let Some(log_path) = log_path {
            dispatch = dispatch.chain(fern::log_file(log_path).map_err(fern::InitError::from)?);
        }

        dispatch.apply()?;
        Ok(())
    }
}
