//! Document loader.
//!
//! This module provides the [`ConfigLoader`] for reading a configuration
//! document from a file or a string: environment substitution first, then
//! YAML or JSON decoding, then the schema-version adapter.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::env;
use crate::error::{DecodeError, DecodeResult};
use crate::version::{self, SchemaVersion};
use crate::Configuration;

/// Document syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// YAML 1.2.
    Yaml,
    /// JSON.
    Json,
}

impl Format {
    /// Determines the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl std::str::FromStr for Format {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(DecodeError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Loads a configuration document.
///
/// # Example
///
/// ```
/// use otelconf_schema::{ConfigLoader, Format};
///
/// let config = ConfigLoader::new()
///     .with_string("file_format: \"0.3\"\ndisabled: true", Format::Yaml)
///     .load()
///     .unwrap();
///
/// assert!(config.is_disabled());
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    source: Option<(String, Format)>,
    substitute_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader with environment substitution enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: None,
            substitute_env: true,
        }
    }

    /// Read the document from a file.
    ///
    /// The format is taken from the `.yaml`, `.yml` or `.json` extension.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the file cannot be read or has an unknown
    /// extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> DecodeResult<Self> {
        let path = path.as_ref();
        let format = Format::from_path(path)
            .ok_or_else(|| DecodeError::UnsupportedFormat(path.display().to_string()))?;
        let content = fs::read_to_string(path).map_err(|e| DecodeError::read(path, e))?;

        tracing::debug!(path = %path.display(), ?format, "read configuration file");
        self.source = Some((content, format));
        Ok(self)
    }

    /// Read the document from a string.
    #[must_use]
    pub fn with_string(mut self, content: impl Into<String>, format: Format) -> Self {
        self.source = Some((content.into(), format));
        self
    }

    /// Enable or disable `${NAME}` substitution.
    #[must_use]
    pub fn with_env_substitution(mut self, enabled: bool) -> Self {
        self.substitute_env = enabled;
        self
    }

    /// Decode the document.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if no source was given, substitution fails, the
    /// text is malformed, `file_format` is missing or unsupported, or a field
    /// has the wrong shape.
    pub fn load(self) -> DecodeResult<Configuration> {
        let (content, format) = self
            .source
            .ok_or_else(|| DecodeError::UnsupportedFormat("no configuration source".into()))?;

        let content = if self.substitute_env {
            env::substitute(&content)?
        } else {
            content
        };

        let tree = match format {
            Format::Yaml => serde_yaml::from_str::<Value>(&content)?,
            Format::Json => serde_json::from_str::<Value>(&content)?,
        };
        decode_tree(tree)
    }
}

/// Decode a YAML document, substituting environment variables first.
///
/// # Errors
///
/// See [`ConfigLoader::load`].
pub fn parse_yaml(content: &[u8]) -> DecodeResult<Configuration> {
    parse(content, Format::Yaml)
}

/// Decode a JSON document, substituting environment variables first.
///
/// # Errors
///
/// See [`ConfigLoader::load`].
pub fn parse_json(content: &[u8]) -> DecodeResult<Configuration> {
    parse(content, Format::Json)
}

fn parse(content: &[u8], format: Format) -> DecodeResult<Configuration> {
    let text = String::from_utf8_lossy(content);
    ConfigLoader::new().with_string(text, format).load()
}

fn decode_tree(mut tree: Value) -> DecodeResult<Configuration> {
    let root = match &mut tree {
        Value::Object(root) => root,
        Value::Null => return Err(DecodeError::missing_field("file_format")),
        _ => return Err(DecodeError::NotAMapping),
    };

    let file_format = version::file_format(root)?;
    let version = SchemaVersion::parse(&file_format)
        .ok_or_else(|| DecodeError::UnsupportedVersion(file_format.clone()))?;

    version.normalize(&mut tree)?;
    tracing::debug!(%file_format, ?version, "decoding configuration");

    Ok(serde_json::from_value(tree)?)
}
