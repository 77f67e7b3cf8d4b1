//! Builder error types.

use std::fmt;
use std::path::PathBuf;

use otelconf_schema::DecodeError;
use thiserror::Error;

/// The signal a processor or exporter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Traces.
    Span,
    /// Metrics.
    Metric,
    /// Logs.
    Log,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Span => "span",
            Self::Metric => "metric",
            Self::Log => "log",
        })
    }
}

/// A single configuration mistake found while building providers.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A processor declares both `batch` and `simple`.
    #[error("must not specify multiple {signal} processor type")]
    MultipleProcessorTypes {
        /// Signal of the processor.
        signal: Signal,
    },

    /// A processor declares neither `batch` nor `simple`.
    #[error("unsupported {signal} processor type, must be one of simple or batch")]
    UnsupportedProcessorType {
        /// Signal of the processor.
        signal: Signal,
    },

    /// A reader declares both `pull` and `periodic`.
    #[error("must not specify multiple metric reader type")]
    MultipleReaderTypes,

    /// A reader declares neither `pull` nor `periodic`.
    #[error("no valid metric reader")]
    NoValidReader,

    /// An exporter block selects no exporter this signal supports.
    #[error("no valid {signal} exporter")]
    NoValidExporter {
        /// Signal of the exporter.
        signal: Signal,
    },

    /// An exporter block selects more than one exporter.
    #[error("must not specify multiple exporters")]
    MultipleExporters,

    /// A batch or periodic tuning value is negative or out of range.
    #[error("invalid {parameter} {value}")]
    InvalidTuningParameter {
        /// Parameter name, e.g. `batch size`.
        parameter: &'static str,
        /// Offending value.
        value: i64,
    },

    /// OTLP protocol is not one of the supported transports.
    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),

    /// Compression is not `gzip` or `none`.
    #[error("unsupported compression {0:?}")]
    UnsupportedCompression(String),

    /// Endpoint does not parse as a URI.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Endpoint after normalization.
        endpoint: String,
        /// Parser message.
        reason: String,
    },

    /// `headers_list` is malformed.
    #[error("invalid headers list: invalid key: {0:?}")]
    InvalidHeaderList(String),

    /// A header name that cannot be sent as gRPC metadata.
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    /// CA certificate could not be read or parsed.
    #[error("could not create certificate authority chain from certificate {path}: {reason}")]
    CertificateAuthority {
        /// Certificate path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Client certificate or key could not be read or parsed.
    #[error("could not use client certificate: {source}")]
    ClientCertificate {
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Prometheus exporter without `host`.
    #[error("host must be specified")]
    MissingHost,

    /// Prometheus exporter without `port`.
    #[error("port must be specified")]
    MissingPort,

    /// Prometheus port outside `0..=65535`.
    #[error("invalid port {0}")]
    InvalidPort(i64),

    /// A view without a selector.
    #[error("view: no selector provided")]
    MissingViewSelector,

    /// A view whose selector sets no criterion.
    #[error("view_selector: empty selector not supported")]
    EmptyViewSelector,

    /// Unknown `instrument_type`.
    #[error("view_selector: instrument_type: invalid value {0:?}")]
    InvalidInstrumentType(String),

    /// Aggregation override is ambiguous or out of range.
    #[error("invalid aggregation: {0}")]
    InvalidAggregation(String),

    /// A stream filter that excludes keys without listing the kept ones.
    #[error("view_stream: attribute_keys.excluded requires attribute_keys.included")]
    ExcludedKeysWithoutIncluded,

    /// Sampler declares no alternative, or one the SDK cannot build.
    #[error("invalid config: sampler configuration")]
    InvalidSampler,

    /// Unknown propagator name.
    #[error("unsupported propagator {0:?}")]
    UnsupportedPropagator(String),

    /// Resource attribute without a name or value, or with a mistyped value.
    #[error("invalid resource attribute {name:?}: {reason}")]
    InvalidAttribute {
        /// Attribute name.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// Declared and default resource carry different schema URLs.
    #[error("cannot merge resource due to conflicting Schema URL: {default:?} and {declared:?}")]
    SchemaConflict {
        /// Schema URL of the default resource.
        default: String,
        /// Declared schema URL.
        declared: String,
    },

    /// A background component was requested outside a Tokio runtime.
    #[error("{0} requires a Tokio runtime")]
    MissingRuntime(&'static str),

    /// A component that blocks its caller on exports was requested on a
    /// current-thread runtime, where the export could never make progress.
    #[error("{0} requires a multi-threaded Tokio runtime")]
    CurrentThreadRuntime(&'static str),

    /// An exporter constructor failed.
    #[error("failed to create {component}: {reason}")]
    Exporter {
        /// Exporter being built.
        component: &'static str,
        /// Constructor message.
        reason: String,
    },

    /// Prometheus scrape endpoint could not bind.
    #[error("failed to bind prometheus endpoint {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create a new tuning parameter error.
    pub fn tuning(parameter: &'static str, value: i64) -> Self {
        Self::InvalidTuningParameter { parameter, value }
    }

    /// Create a new exporter construction error.
    pub fn exporter(component: &'static str, reason: impl fmt::Display) -> Self {
        Self::Exporter {
            component,
            reason: reason.to_string(),
        }
    }

    /// Create a new invalid attribute error.
    pub fn invalid_attribute(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Every configuration mistake found in one build, in discovery order.
#[derive(Debug, Default)]
pub struct ConfigErrors(Vec<ConfigError>);

impl ConfigErrors {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Records an error.
    pub fn push(&mut self, error: ConfigError) {
        self.0.push(error);
    }

    /// Records every error of another collection.
    pub fn append(&mut self, other: ConfigErrors) {
        self.0.extend(other.0);
    }

    /// Records the error of `result`, if any, and returns its value.
    pub fn collect<T>(&mut self, result: Result<T, impl Into<ConfigErrors>>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(errors) => {
                self.append(errors.into());
                None
            }
        }
    }

    /// Returns `true` when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the recorded errors.
    pub fn iter(&self) -> std::slice::Iter<'_, ConfigError> {
        self.0.iter()
    }

    /// `Ok(value)` when nothing was recorded, `Err(self)` otherwise.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<ConfigError> for ConfigErrors {
    fn from(error: ConfigError) -> Self {
        Self(vec![error])
    }
}

impl IntoIterator for ConfigErrors {
    type Item = ConfigError;
    type IntoIter = std::vec::IntoIter<ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConfigErrors {
    type Item = &'a ConfigError;
    type IntoIter = std::slice::Iter<'a, ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Result of a single configuration check.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors returned when building the SDK facade.
#[derive(Debug, Error)]
pub enum SdkError {
    /// The document could not be loaded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The document loaded but describes invalid pipelines.
    #[error(transparent)]
    Config(#[from] ConfigErrors),
}

/// Result of building the SDK facade.
pub type SdkResult<T> = Result<T, SdkError>;

/// Errors collected while shutting the providers down.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The deadline elapsed before a provider finished.
    #[error("context deadline exceeded: {0} shutdown did not complete")]
    DeadlineExceeded(&'static str),

    /// A provider reported a failure.
    #[error("{component} shutdown failed: {reason}")]
    Provider {
        /// Provider that failed.
        component: &'static str,
        /// Failure message.
        reason: String,
    },
}

/// Every shutdown failure, joined.
#[derive(Debug, Default)]
pub struct ShutdownErrors(pub Vec<ShutdownError>);

impl ShutdownErrors {
    /// Returns `true` when any provider missed the deadline.
    pub fn deadline_exceeded(&self) -> bool {
        self.0
            .iter()
            .any(|e| matches!(e, ShutdownError::DeadlineExceeded(_)))
    }
}

impl fmt::Display for ShutdownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownErrors {}
