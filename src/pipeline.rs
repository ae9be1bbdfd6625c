//! Pipeline Layer
//!
//! Runs sources and sinks as independent tokio tasks:
//!
//! ```text
//! InputStage ──┐                       ┌──▶ OutputStage (buffer, flush timer) ──▶ Sink
//! InputStage ──┼──▶ report channel ──▶ fan-out
//! InputStage ──┘                       └──▶ OutputStage (buffer, flush timer) ──▶ Sink
//! ```
//!
//! Each input stage samples its source every interval and publishes one
//! [`Report`](crate::Report) per poll. The fan-out task hands the same
//! `Arc<Report>` to every output stage, which buffers reports and flushes them
//! to its sink on the same interval and once more on stop.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use pstag::{FnSource, Pipeline, Record};
//! use pstag::plugin::builtin::FileSink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = Pipeline::builder()
//!     .interval(Duration::from_secs(5))
//!     .tag_prefix("host1.")
//!     .build();
//! pipeline.add_source("answer", Box::new(FnSource::new(|| Ok(vec![Record::new("answer", 42.0, 0)]))))?;
//! pipeline.add_sink("stdout", Box::new(FileSink::new(&["-".to_string()])))?;
//!
//! pipeline.run().await?;
//! tokio::time::sleep(Duration::from_secs(30)).await;
//! pipeline.stop().await;
//! # Ok(())
//! # }
//! ```

mod input;
mod orchestrator;
mod output;
#[cfg(test)]
mod testing;
mod worker;

use thiserror::Error;

use crate::plugin::{PluginError, PluginKind};

pub use input::InputStage;
pub use orchestrator::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_INTERVAL, DEFAULT_OUTPUT_CAPACITY, MIN_INTERVAL, Pipeline,
    PipelineBuilder, clamp_interval,
};
pub use output::OutputStage;

/// Stage and pipeline lifecycle errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A plugin failed to open; the stage did not start.
    #[error("failed to open {kind} '{stage}': {source}")]
    Open {
        kind: PluginKind,
        stage: String,
        #[source]
        source: PluginError,
    },

    /// `start`/`run` called on something already running, or a plugin added
    /// to a running pipeline.
    #[error("'{0}' is already started")]
    AlreadyStarted(String),

    /// `start`/`run` called after a stop; stages run at most once.
    #[error("'{0}' has already been stopped")]
    Stopped(String),
}
