//! Configuration management for drover
//!
//! Handles loading and validation of drover.toml configuration files.
//!
//! # Schema Overview
//!
//! - `run`: Retry budget, settle delay, retry delay
//! - `resume`: Resume-on-start policy hooks
//! - `logging`: Log level, format, optional file
//!
//! All sections use `#[serde(default)]` so missing fields fall back to
//! defaults, and unknown fields are ignored for forward compatibility.
//!
//! The retry budget and settle delay can additionally be overridden by
//! operator-tunable settings persisted in the durable store; those
//! overrides are applied at session bootstrap and win over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::ConfigError;

/// Main configuration structure for drover
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Run settings (budget and delays)
    pub run: RunConfig,

    /// Resume-on-start policy
    pub resume: ResumeConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file is missing, unreadable, fails to
    /// parse, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        let config: Self =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional path, falling back to defaults when absent.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run.validate()
    }
}

/// Run settings: the retry budget and the fixed scheduler delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum attempts allowed for one step before the run fails
    pub default_tries: u32,

    /// Pause after a successful step before the next is attempted (ms)
    pub settle_delay_ms: u64,

    /// Pause before re-attempting a not-yet-ready step (ms)
    pub retry_delay_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_tries: 15,
            settle_delay_ms: 650,
            retry_delay_ms: 500,
        }
    }
}

impl RunConfig {
    /// Validate run settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_tries == 0 {
            return Err(ConfigError::ValidationError(
                "run.default_tries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert into the engine's runtime configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_tries: self.default_tries,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Resume-on-start policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// When a pending queue contains a `resize` step and the current
    /// window was not spawned by a controlling parent, defer automatic
    /// resumption until a parent-controlled window exists.
    pub defer_for_resize: bool,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            defer_for_resize: true,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format (default for interactive use)
    #[default]
    Pretty,
    /// Machine-parseable JSON lines (for CI/ops)
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::ParseFailed(format!(
                "invalid log format: {other} (expected 'pretty' or 'json')"
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error).
    /// Can be overridden by the RUST_LOG environment variable.
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional path to a log file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}
