//! Decode error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort loading before any telemetry pipeline is built.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Failed to read the configuration file.
    #[error("failed to read configuration file: {path}")]
    Read {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document format could not be determined or is not supported.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// YAML parsing error.
    #[error("failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error, also raised when a field has the wrong shape.
    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The document root is not a mapping.
    #[error("configuration document must be a mapping")]
    NotAMapping,

    /// A required field is absent.
    #[error("missing required field: {field}")]
    MissingField {
        /// The missing field name.
        field: String,
    },

    /// `file_format` names a schema version this crate cannot read.
    #[error("unsupported file_format {0:?}")]
    UnsupportedVersion(String),

    /// A `${...}` reference does not name a valid environment variable.
    #[error("could not substitute environment variables: invalid environment variable name: {0}")]
    InvalidVariable(String),
}

impl DecodeError {
    /// Create a new read error.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Create a new missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Result alias for loading operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
