//! pstag Binary Entry Point
//!
//! Samples the selected inputs on a fixed interval and delivers tagged
//! reports to the selected outputs until interrupted.
//! Core functionality is provided by the `pstag` library crate.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};
use pstag::{
    AppConfig, PluginRegistry, build_pipeline,
    config::{LogLevel, LogRotation, PluginSpec, parse_duration},
    logging,
    plugin::{PluginArg, Registration},
};

/// pstag - periodic sampling, tagged delivery
#[derive(Parser, Debug)]
#[command(name = "pstag", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "PSTAG_CONFIG")]
    config: Option<PathBuf>,

    /// Sampling and flush interval, e.g. 10s (minimum 1s)
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Prefix prepended to every metric name
    #[arg(long)]
    tag_prefix: Option<String>,

    /// Log level (overrides config file)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Log file, '-' for stdout, '' to disable (overrides config file)
    #[arg(long)]
    log_file: Option<String>,

    /// Log file rollover: never, minutely, hourly or daily (overrides config file)
    #[arg(long)]
    log_rotation: Option<LogRotation>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = PluginRegistry::with_builtins()?;

    // Parse CLI arguments, with one flag per registered plugin
    let matches = Cli::command()
        .args(plugin_args(&registry))
        .after_help(registry.usage())
        .get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(interval) = cli.interval {
        config.interval = interval;
    }
    if let Some(prefix) = cli.tag_prefix {
        config.tag_prefix = prefix;
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    if let Some(file) = cli.log_file {
        config.log.file = file;
    }
    if let Some(rotation) = cli.log_rotation {
        config.log.rotation = rotation;
    }
    let (inputs, outputs) = selected_plugins(&registry, &matches);
    config.inputs.extend(inputs);
    config.outputs.extend(outputs);
    config.validate()?;

    let _log_guard = logging::init(&config.log)?;

    if config.inputs.is_empty() {
        return Err("no input configured, see --help".into());
    }
    if config.outputs.is_empty() {
        return Err("no output configured, see --help".into());
    }

    let mut pipeline = build_pipeline(&config, &registry)?;
    pipeline.run().await?;

    tracing::info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;

    pipeline.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// One hidden flag per plugin; the registry's usage text documents them.
fn plugin_args(registry: &PluginRegistry) -> Vec<Arg> {
    let sources = registry.sources().map(plugin_arg);
    let sinks = registry.sinks().map(plugin_arg);
    sources.chain(sinks).collect()
}

fn plugin_arg<F>(reg: &Registration<F>) -> Arg {
    let arg = Arg::new(reg.name.clone())
        .long(reg.name.clone())
        .help(reg.description.lines().next().unwrap_or_default().to_string())
        .hide(true);

    match &reg.arg {
        PluginArg::Switch => arg.action(ArgAction::SetTrue),
        PluginArg::Value {
            value_name,
            default,
        } => {
            let arg = arg.value_name(value_name.clone()).action(ArgAction::Set);
            if default.is_empty() {
                arg.num_args(1)
            } else {
                arg.num_args(0..=1).default_missing_value(default.clone())
            }
        }
    }
}

/// Plugins selected on the command line, in registry order.
fn selected_plugins(
    registry: &PluginRegistry,
    matches: &ArgMatches,
) -> (Vec<PluginSpec>, Vec<PluginSpec>) {
    let inputs = registry
        .sources()
        .filter_map(|reg| selected(reg, matches))
        .collect();
    let outputs = registry
        .sinks()
        .filter_map(|reg| selected(reg, matches))
        .collect();
    (inputs, outputs)
}

fn selected<F>(reg: &Registration<F>, matches: &ArgMatches) -> Option<PluginSpec> {
    match reg.arg {
        PluginArg::Switch => matches
            .get_flag(&reg.name)
            .then(|| PluginSpec::new(reg.name.clone(), vec![])),
        PluginArg::Value { .. } => matches
            .get_one::<String>(&reg.name)
            .map(|value| PluginSpec::new(reg.name.clone(), vec![value.clone()])),
    }
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
