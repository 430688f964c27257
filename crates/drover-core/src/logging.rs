//! Structured logging for drover
//!
//! Uses `tracing` with configurable output formats:
//!
//! - **Pretty format**: Human-friendly output for interactive use
//! - **JSON format**: Machine-parseable JSON lines for CI/ops
//! - **File output**: Optional log file
//!
//! Initialize once at startup:
//!
//! ```ignore
//! use drover_core::config::LoggingConfig;
//! use drover_core::logging::init_logging;
//!
//! init_logging(&LoggingConfig::default())?;
//! ```
//!
//! Correlation fields used consistently in spans and events:
//! - `step`: raw text of the instruction being executed
//! - `attempt`: attempt number for the current step
//! - `key`: durable store key being read or written

use std::io;
use std::sync::OnceLock;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize the global tracing subscriber.
///
/// The level filter honors `RUST_LOG` when set, falling back to the
/// configured level.
///
/// # Errors
/// Returns an error if logging was already initialized, the level is
/// invalid, or the log file cannot be created.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;

    let file_writer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Some(std::fs::File::create(path)?)
        }
        None => None,
    };

    match (config.format, file_writer) {
        (LogFormat::Pretty, None) => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        (LogFormat::Json, None) => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        (LogFormat::Pretty, Some(file)) => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(file));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        (LogFormat::Json, Some(file)) => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .with(fmt::layer().json().with_writer(file));
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let _ = LOGGING_INITIALIZED.set(true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_is_rejected() {
        // EnvFilter accepts most strings as targets; a directive with a
        // bad level fails.
        let config = LoggingConfig {
            level: "drover=notalevel".to_string(),
            ..LoggingConfig::default()
        };
        // Either the filter parse fails, or init succeeds once in the
        // whole test process; both are acceptable here. What must not
        // happen is a panic.
        let _ = init_logging(&config);
    }
}
