//! Configuration module for pstag.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Pipeline settings (interval, tag prefix, channel capacities)
//! - Logging (level, destination)
//! - Input and output plugins, resolved by name through a [`PluginRegistry`]

mod app;
mod validation;

pub use app::{AppConfig, LogConfig, LogLevel, LogRotation, PluginSpec};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

use crate::pipeline::Pipeline;
use crate::plugin::PluginRegistry;

/// Build a pipeline from `config`, creating every plugin through `registry`.
///
/// Plugin arguments have environment variables expanded first. Stages are
/// named after their plugin.
///
/// # Errors
/// Returns `ConfigError::UnknownSource` / `UnknownSink` for a plugin name the
/// registry does not know.
pub fn build_pipeline(
    config: &AppConfig,
    registry: &PluginRegistry,
) -> Result<Pipeline, ConfigError> {
    let mut pipeline = Pipeline::builder()
        .interval(config.interval)
        .tag_prefix(config.tag_prefix.clone())
        .channel_capacity(config.channel_capacity)
        .output_capacity(config.output_capacity)
        .build();

    for spec in &config.inputs {
        let source = registry
            .create_source(&spec.name, &spec.expanded_args())
            .ok_or_else(|| ConfigError::UnknownSource(spec.name.clone()))?;
        pipeline.add_source(spec.name.clone(), source)?;
        tracing::debug!(plugin = %spec.name, args = ?spec.args, "Input configured");
    }

    for spec in &config.outputs {
        let sink = registry
            .create_sink(&spec.name, &spec.expanded_args())
            .ok_or_else(|| ConfigError::UnknownSink(spec.name.clone()))?;
        pipeline.add_sink(spec.name.clone(), sink)?;
        tracing::debug!(plugin = %spec.name, args = ?spec.args, "Output configured");
    }

    Ok(pipeline)
}
