//! Data model and loader for OpenTelemetry declarative configuration.
//!
//! This crate reads a versioned configuration document describing trace,
//! metric and log pipelines and produces a [`Configuration`] tree. Building
//! telemetry providers from the tree is the job of the `otelconf` crate.
//!
//! - YAML and JSON documents
//! - `${NAME}` environment substitution on the raw text
//! - `file_format` `0.1`, `0.2` and `0.3`, normalized into one model
//! - [`OneOf`] for "exactly one of" choices, so that a document selecting two
//!   exporters still decodes and can be reported with every other mistake
//!
//! # Example
//!
//! ```
//! use otelconf_schema::{parse_yaml, trace::SpanProcessorKind};
//!
//! let yaml = br#"
//! file_format: "0.3"
//! tracer_provider:
//!   processors:
//!     - simple:
//!         exporter:
//!           console:
//! "#;
//!
//! let config = parse_yaml(yaml).unwrap();
//! let provider = config.tracer_provider.unwrap();
//! assert!(matches!(
//!     provider.processors[0].as_one(),
//!     Some(SpanProcessorKind::Simple(_))
//! ));
//! ```

#![doc(html_root_url = "https://docs.rs/otelconf-schema/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
pub mod env;
mod error;
pub mod exporter;
mod loader;
pub mod log;
pub mod metric;
mod one_of;
pub mod trace;
mod version;

pub use config::{
    AttributeLimits, AttributeNameValue, AttributeType, Configuration, Propagator, Resource,
};
pub use error::{DecodeError, DecodeResult};
pub use loader::{parse_json, parse_yaml, ConfigLoader, Format};
pub use one_of::{Empty, OneOf, Variants};
pub use version::SchemaVersion;
