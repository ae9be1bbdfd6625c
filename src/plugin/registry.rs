//! Name-keyed catalog of source and sink factories.

use std::collections::HashMap;
use std::fmt::Write as _;

use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use crate::plugin::{Sink, Source};

/// Column at which descriptions start in [`PluginRegistry::usage`].
const USAGE_DESCRIPTION_COLUMN: usize = 24;

/// Factory building a source from its command-line/config arguments.
pub type SourceFactory = Box<dyn Fn(&[String]) -> Box<dyn Source> + Send + Sync>;

/// Factory building a sink from its command-line/config arguments.
pub type SinkFactory = Box<dyn Fn(&[String]) -> Box<dyn Sink> + Send + Sync>;

/// Which side of the pipeline a plugin belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PluginKind {
    Source,
    Sink,
}

/// Argument taken by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginArg {
    /// No argument; the plugin is either enabled or not (default: off).
    Switch,
    /// A single string argument.
    Value {
        /// Placeholder shown in help output (e.g. "path").
        value_name: String,
        /// Default value when none is given.
        default: String,
    },
}

impl PluginArg {
    /// Shorthand for a value argument with an empty default.
    pub fn value(value_name: impl Into<String>) -> Self {
        Self::Value {
            value_name: value_name.into(),
            default: String::new(),
        }
    }
}

/// Errors raised while registering plugins.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A plugin with this name is already registered.
    #[error("{kind} plugin '{name}' is already registered")]
    Duplicate { kind: PluginKind, name: String },
}

/// One registry entry.
pub struct Registration<F> {
    /// Unique plugin name (also its command-line flag).
    pub name: String,
    /// Constructor.
    pub factory: F,
    /// Argument the plugin takes.
    pub arg: PluginArg,
    /// Human-readable help text; may span several lines.
    pub description: String,
}

impl<F> std::fmt::Debug for Registration<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("arg", &self.arg)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Append-only map that remembers insertion order for listing.
struct Catalog<F> {
    kind: PluginKind,
    entries: HashMap<String, Registration<F>>,
    order: Vec<String>,
}

impl<F> Catalog<F> {
    fn new(kind: PluginKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn insert(&mut self, registration: Registration<F>) -> Result<(), RegistryError> {
        if self.entries.contains_key(&registration.name) {
            return Err(RegistryError::Duplicate {
                kind: self.kind,
                name: registration.name,
            });
        }
        tracing::debug!(kind = %self.kind, plugin = %registration.name, "Plugin registered");
        self.order.push(registration.name.clone());
        self.entries.insert(registration.name.clone(), registration);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&Registration<F>> {
        self.entries.get(name)
    }

    fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    fn iter(&self) -> impl Iterator<Item = &Registration<F>> {
        self.order.iter().filter_map(|name| self.entries.get(name))
    }
}

/// Catalog mapping plugin names to factories.
///
/// Built once at startup and passed by reference to the wiring code.
/// Registration needs `&mut self`, so it must complete before the registry is
/// shared with a running pipeline.
pub struct PluginRegistry {
    sources: Catalog<SourceFactory>,
    sinks: Catalog<SinkFactory>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("sources", &self.sources.order)
            .field("sinks", &self.sinks.order)
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sources: Catalog::new(PluginKind::Source),
            sinks: Catalog::new(PluginKind::Sink),
        }
    }

    /// Create a registry holding every built-in plugin.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        crate::plugin::builtin::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Register a source factory.
    ///
    /// # Errors
    /// Returns `RegistryError::Duplicate` if `name` is already a source.
    pub fn register_source<F>(
        &mut self,
        name: impl Into<String>,
        factory: F,
        arg: PluginArg,
        description: impl Into<String>,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[String]) -> Box<dyn Source> + Send + Sync + 'static,
    {
        self.sources.insert(Registration {
            name: name.into(),
            factory: Box::new(factory),
            arg,
            description: description.into(),
        })
    }

    /// Register a sink factory.
    ///
    /// # Errors
    /// Returns `RegistryError::Duplicate` if `name` is already a sink.
    pub fn register_sink<F>(
        &mut self,
        name: impl Into<String>,
        factory: F,
        arg: PluginArg,
        description: impl Into<String>,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[String]) -> Box<dyn Sink> + Send + Sync + 'static,
    {
        self.sinks.insert(Registration {
            name: name.into(),
            factory: Box::new(factory),
            arg,
            description: description.into(),
        })
    }

    /// Build a source, or `None` if no source is registered under `name`.
    pub fn create_source(&self, name: &str, args: &[String]) -> Option<Box<dyn Source>> {
        self.sources.get(name).map(|reg| (reg.factory)(args))
    }

    /// Build a sink, or `None` if no sink is registered under `name`.
    pub fn create_sink(&self, name: &str, args: &[String]) -> Option<Box<dyn Sink>> {
        self.sinks.get(name).map(|reg| (reg.factory)(args))
    }

    /// Source names in registration order.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.names()
    }

    /// Sink names in registration order.
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.names()
    }

    /// Look up a source entry.
    pub fn source(&self, name: &str) -> Option<&Registration<SourceFactory>> {
        self.sources.get(name)
    }

    /// Look up a sink entry.
    pub fn sink(&self, name: &str) -> Option<&Registration<SinkFactory>> {
        self.sinks.get(name)
    }

    /// Source entries in registration order.
    pub fn sources(&self) -> impl Iterator<Item = &Registration<SourceFactory>> {
        self.sources.iter()
    }

    /// Sink entries in registration order.
    pub fn sinks(&self) -> impl Iterator<Item = &Registration<SinkFactory>> {
        self.sinks.iter()
    }

    /// Render the plugin catalog as help text.
    pub fn usage(&self) -> String {
        let mut out = String::from("Input Options:\n");
        for reg in self.sources() {
            write_usage_entry(&reg.name, &reg.arg, &reg.description, &mut out);
        }
        out.push_str("\nOutput Options:\n");
        for reg in self.sinks() {
            write_usage_entry(&reg.name, &reg.arg, &reg.description, &mut out);
        }
        out
    }
}

fn write_usage_entry(name: &str, arg: &PluginArg, description: &str, out: &mut String) {
    let flag = match arg {
        PluginArg::Switch => format!("--{name}"),
        PluginArg::Value { value_name, .. } => format!("--{name} <{value_name}>"),
    };

    let mut lines = description.lines();
    let first = lines.next().unwrap_or_default();
    if flag.len() < USAGE_DESCRIPTION_COLUMN {
        let _ = writeln!(out, "    {flag:<USAGE_DESCRIPTION_COLUMN$}{first}");
    } else {
        let _ = writeln!(out, "    {flag}");
        let _ = writeln!(out, "    {:USAGE_DESCRIPTION_COLUMN$}{first}", "");
    }
    for line in lines {
        let _ = writeln!(out, "    {:USAGE_DESCRIPTION_COLUMN$}{line}", "");
    }
}
