//! Tracing subscriber setup.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogConfig, LogRotation};

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log path does not name a file.
    #[error("log file path '{0}' has no file name")]
    InvalidPath(PathBuf),

    /// The log file could not be created.
    #[error("failed to open log file '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: InitError,
    },

    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Disabled,
    Stdout,
    File(PathBuf),
}

impl LogDestination {
    /// `-` is stdout, empty disables logging, anything else is a file path.
    pub fn parse(file: &str) -> Self {
        match file.trim() {
            "" => Self::Disabled,
            "-" => Self::Stdout,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

/// Appender writing to `path`, rolled over every `rotation` period.
///
/// Missing parent directories are created.
fn rolling_appender(
    path: &Path,
    rotation: LogRotation,
    max_files: Option<usize>,
) -> Result<RollingFileAppender, LoggingError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidPath(path.to_path_buf()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation.into())
        .filename_prefix(file_name.to_string_lossy());
    if let Some(max_files) = max_files {
        builder = builder.max_log_files(max_files);
    }
    builder.build(dir).map_err(|source| LoggingError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` overrides the configured level. Log lines are written through a
/// non-blocking writer; keep the returned guard alive until exit so buffered
/// lines are flushed. Returns `None` when logging is disabled.
///
/// # Errors
/// Fails if the log file cannot be created or a subscriber is already set.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_ref()));

    let (writer, guard, ansi) = match LogDestination::parse(&config.file) {
        LogDestination::Disabled => return Ok(None),
        LogDestination::Stdout => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (writer, guard, true)
        }
        LogDestination::File(path) => {
            let appender = rolling_appender(&path, config.rotation, config.max_files)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, false)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(ansi))
        .try_init()?;

    tracing::debug!(level = %config.level, file = %config.file, "Logging initialized");
    Ok(Some(guard))
}
