//! Plugin Layer
//!
//! Sources (inlets) produce metric records on demand; sinks (outlets) deliver
//! batches of reports. The pipeline only knows the [`Source`] and [`Sink`]
//! traits. Concrete plugins are constructed by name through a
//! [`PluginRegistry`], typically from CLI flags or the config file.
//!
//! # Example
//!
//! ```rust
//! use pstag::plugin::{FnSource, PluginArg, PluginRegistry, Source};
//! use pstag::Record;
//!
//! let mut registry = PluginRegistry::with_builtins().unwrap();
//! registry
//!     .register_source(
//!         "in-answer",
//!         |_: &[String]| {
//!             Box::new(FnSource::new(|| Ok(vec![Record::new("answer", 42.0, 0)])))
//!                 as Box<dyn Source>
//!         },
//!         PluginArg::Switch,
//!         "Report the answer",
//!     )
//!     .unwrap();
//!
//! assert!(registry.create_source("in-answer", &[]).is_some());
//! assert!(registry.create_source("in-unknown", &[]).is_none());
//! ```

pub mod builtin;
mod registry;
mod traits;

pub use registry::{
    PluginArg, PluginKind, PluginRegistry, Registration, RegistryError, SinkFactory,
    SourceFactory,
};
pub use traits::{FnSource, PluginError, Sink, Source};
