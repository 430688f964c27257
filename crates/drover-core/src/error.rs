//! Error types for drover-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for drover-core
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Run-terminating script failures
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Stored value for '{key}' is corrupt: {details}")]
    Corrupt { key: String, details: String },
}

/// Errors that terminate a run.
///
/// Retryable conditions (element absent, URL mismatch, rejected value)
/// never appear here — they stay inside the engine as retry outcomes
/// until the step's attempt budget is exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The parser could not classify a non-comment, non-empty line.
    /// Fatal immediately, no retry.
    #[error("Command not found: {raw}")]
    UnknownCommand { raw: String },

    /// One step retried its full budget without success. Fatal for the
    /// run; the queue is discarded rather than left half-done.
    #[error("Unable to complete: {raw}{}", location.as_deref().map(|l| format!(". Error in {l}")).unwrap_or_default())]
    BudgetExhausted {
        /// Raw text of the failing instruction
        raw: String,
        /// Location label derived from the nearest preceding `name` step
        location: Option<String>,
    },

    /// The remote instruction document for a `test` step could not be
    /// fetched.
    #[error("Script fetch failed: {0}")]
    FetchFailed(String),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
