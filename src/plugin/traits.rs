//! Source and sink capability contracts.

use std::sync::Arc;

use thiserror::Error;

use crate::report::{Record, Report};

/// Errors raised by plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// File or stream I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// MQTT client error.
    #[error("mqtt error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Plugin argument is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying resource could not be read or reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// `sample`/`handle` was called before a successful `open`.
    #[error("plugin is not open")]
    NotOpen,
}

/// A pluggable producer of metric samples.
///
/// The owning input stage calls [`open`](Source::open) once, then
/// [`sample`](Source::sample) on every tick, then [`close`](Source::close)
/// once after polling has stopped. A source is never shared between stages.
#[async_trait::async_trait]
pub trait Source: Send {
    /// Acquire resources (resolve an address, open a handle, ...).
    async fn open(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Perform one poll.
    ///
    /// May be slow; the caller controls the cadence and applies no timeout.
    async fn sample(&mut self) -> Result<Vec<Record>, PluginError>;

    /// Release resources.
    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A pluggable consumer of batched reports.
///
/// [`handle`](Sink::handle) receives everything an output stage buffered
/// since its previous flush. The batch may contain reports with no records.
#[async_trait::async_trait]
pub trait Sink: Send {
    /// Acquire resources (open a file, validate an endpoint, ...).
    async fn open(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Deliver a batch. Failures are logged by the caller and not retried.
    async fn handle(&mut self, batch: &[Arc<Report>]) -> Result<(), PluginError>;

    /// Release resources.
    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Adapts a sampling closure into a [`Source`] with no-op open and close.
///
/// ```
/// use pstag::{FnSource, Record};
///
/// let source = FnSource::new(|| Ok(vec![Record::new("answer", 42.0, 0)]));
/// # let _ = source;
/// ```
pub struct FnSource<F> {
    sample: F,
}

impl<F> FnSource<F>
where
    F: FnMut() -> Result<Vec<Record>, PluginError> + Send,
{
    /// Wrap a closure.
    pub fn new(sample: F) -> Self {
        Self { sample }
    }
}

impl<F> std::fmt::Debug for FnSource<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<F> Source for FnSource<F>
where
    F: FnMut() -> Result<Vec<Record>, PluginError> + Send,
{
    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        (self.sample)()
    }
}
