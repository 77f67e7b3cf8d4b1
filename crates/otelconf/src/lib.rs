//! # otelconf
//!
//! Builds OpenTelemetry SDK providers from a declarative configuration
//! document.
//!
//! A document loaded by [`otelconf_schema`] describes a resource, trace,
//! metric and log pipelines, and the context propagators. This crate turns it
//! into live SDK objects:
//!
//! - [`build_resource`] merges the declared resource over a default one
//! - [`build_tracer_provider`], [`build_meter_provider`] and
//!   [`build_logger_provider`] fold processors, readers and views into
//!   providers
//! - [`build_propagator`] resolves propagator names into one composite
//! - [`Sdk`] does all of the above and owns the result until shutdown
//!
//! # Error reporting
//!
//! Builders never stop at the first mistake. Every error found in a
//! declaration is collected into [`ConfigErrors`], and a failed provider build
//! still hands back a no-op provider through [`BuildError::into_noop`], so a
//! caller can choose to continue without telemetry.
//!
//! # Runtime
//!
//! Batch processors, periodic readers, gRPC exporters and prometheus scrape
//! endpoints run on the ambient Tokio runtime. Declaring one outside a runtime
//! is reported as [`ConfigError::MissingRuntime`].
//!
//! # Example
//!
//! ```no_run
//! use otelconf::Sdk;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sdk = Sdk::from_file("otel.yaml")?;
//! sdk.install_global();
//!
//! // ... application runs ...
//!
//! sdk.shutdown_with_timeout(std::time::Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/otelconf/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod batch;
mod error;
pub mod headers;
mod log;
mod metric;
mod offload;
pub mod otlp;
pub mod propagation;
mod provider;
mod resource;
pub mod sampler;
pub mod scrape;
mod sdk;
pub mod tls;
mod trace;
pub mod view;

pub use batch::BatchTuning;
pub use error::{
    ConfigError, ConfigErrors, ConfigResult, SdkError, SdkResult, ShutdownError, ShutdownErrors,
    Signal,
};
pub use log::{build_logger_provider, build_logger_provider_with};
pub use metric::{build_meter_provider, build_meter_provider_with, MeterProviderHandle};
pub use propagation::{build_propagator, ConfiguredPropagator, PropagatorName};
pub use provider::{BuildError, BuildResult, Noop, SignalProvider};
pub use resource::build_resource;
pub use sdk::{Sdk, SdkBuilder, CONFIG_FILE_ENV};
pub use trace::{build_tracer_provider, build_tracer_provider_with};

pub use otelconf_schema as schema;
