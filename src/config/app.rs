//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::pipeline::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_INTERVAL, DEFAULT_OUTPUT_CAPACITY};

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Logging Configuration
// =============================================================================

/// Log verbosity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// How often a log file is rolled over.
///
/// Rolled files get a date suffix (e.g. `pstag.log.2024-05-01`); with
/// `never` the configured path is written as is.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogRotation {
    #[default]
    Never,
    Minutely,
    Hourly,
    Daily,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level (default: info). `RUST_LOG` takes precedence.
    pub level: LogLevel,

    /// Destination: `-` for stdout (default), empty to disable, otherwise a
    /// file path.
    pub file: String,

    /// Rollover period of the log file (default: never).
    pub rotation: LogRotation,

    /// Rolled files to keep; older ones are deleted (default: keep all).
    pub max_files: Option<usize>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: "-".to_string(),
            rotation: LogRotation::Never,
            max_files: None,
        }
    }
}

// =============================================================================
// Plugin Configuration
// =============================================================================

/// One plugin to instantiate through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Registered plugin name, e.g. `in-cpu` or `out-file`.
    pub name: String,

    /// Arguments passed to the plugin factory.
    #[serde(default)]
    pub args: Vec<String>,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Arguments with `${VAR}` / `${VAR:-default}` expanded.
    pub fn expanded_args(&self) -> Vec<String> {
        self.args.iter().map(|arg| expand_env_vars(arg)).collect()
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sampling and flush interval (default: 10s, floored at 1s at run time).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Prefix prepended to every record name.
    pub tag_prefix: String,

    /// Capacity of the report channel shared by inputs (default: 100).
    pub channel_capacity: usize,

    /// Capacity of each output's inbound channel (default: 1).
    pub output_capacity: usize,

    /// Logging configuration.
    pub log: LogConfig,

    /// Source plugins.
    pub inputs: Vec<PluginSpec>,

    /// Sink plugins.
    pub outputs: Vec<PluginSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            tag_prefix: String::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            log: LogConfig::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    ///
    /// # Errors
    /// Returns `ConfigError` if the text cannot be parsed or validated.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be positive".to_string(),
            ));
        }

        if self.output_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "output_capacity must be positive".to_string(),
            ));
        }

        if self.log.max_files == Some(0) {
            return Err(ConfigError::ValidationError(
                "log.max_files must be positive".to_string(),
            ));
        }

        for (section, specs) in [("inputs", &self.inputs), ("outputs", &self.outputs)] {
            if let Some(index) = specs.iter().position(|spec| spec.name.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "{section}[{index}]: plugin name must not be empty"
                )));
            }
        }

        Ok(())
    }
}
