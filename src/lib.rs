//! pstag - Periodic Sampling, Tagged Delivery
//!
//! This crate samples host counters and other sources on a fixed interval,
//! tags every metric with an optional prefix, and hands the resulting reports
//! to any number of buffered outlets. It can be used as a library or run as
//! the standalone `pstag` binary.
//!
//! # Architecture
//!
//! - **Report**: timestamped batches of named metric records
//! - **Plugin**: `Source`/`Sink` contracts, the name-keyed registry and the built-in plugins
//! - **Pipeline**: input stages, fan-out and output stages running as tokio tasks
//! - **Config**: YAML configuration resolved through the registry
//! - **Logging**: `tracing` subscriber setup
//!
//! # Example
//!
//! ```rust,no_run
//! use pstag::{AppConfig, PluginRegistry, build_pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("pstag.yaml")?;
//!     let registry = PluginRegistry::with_builtins()?;
//!     let mut pipeline = build_pipeline(&config, &registry)?;
//!
//!     pipeline.run().await?;
//!     tokio::signal::ctrl_c().await?;
//!     pipeline.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod pipeline;
pub mod plugin;
pub mod report;

pub use config::{AppConfig, ConfigError, build_pipeline};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError};
pub use plugin::{FnSource, PluginError, PluginRegistry, Sink, Source};
pub use report::{Record, Report};
