//! Schema versions and the adapters that normalize them.
//!
//! Documents written against `0.1` and `0.2` use flat mappings where `0.3`
//! uses name/value lists. The adapter rewrites those fields so every version
//! decodes into the same [`Configuration`](crate::Configuration).

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::error::{DecodeError, DecodeResult};

/// A supported `file_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// `0.1` and `0.2`: flat attribute and header maps.
    V0_2,
    /// `0.3`: typed name/value lists.
    V0_3,
}

impl SchemaVersion {
    /// Parses a `file_format` value such as `"0.3"` or `"0.2.0"`.
    pub fn parse(file_format: &str) -> Option<Self> {
        let mut parts = file_format.trim().split('.');
        let major = parts.next()?;
        let minor = parts.next()?;
        if parts.next().is_some_and(|patch| patch.parse::<u32>().is_err()) {
            return None;
        }
        match (major, minor) {
            ("0", "1" | "2") => Some(Self::V0_2),
            ("0", "3") => Some(Self::V0_3),
            _ => None,
        }
    }

    /// Rewrites `document` into the current layout.
    pub fn normalize(self, document: &mut Value) -> DecodeResult<()> {
        match self {
            Self::V0_3 => Ok(()),
            Self::V0_2 => normalize_v0_2(document),
        }
    }
}

/// Reads `file_format`, accepting YAML numbers such as `0.3` as strings.
pub(crate) fn file_format(document: &mut Map<String, Value>) -> DecodeResult<String> {
    let value = document
        .get_mut("file_format")
        .ok_or_else(|| DecodeError::missing_field("file_format"))?;
    let format = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => return Err(DecodeError::missing_field("file_format")),
        other => return Err(DecodeError::UnsupportedVersion(other.to_string())),
    };
    *value = Value::String(format.clone());
    Ok(format)
}

fn normalize_v0_2(document: &mut Value) -> DecodeResult<()> {
    if let Some(attributes) = document
        .get_mut("resource")
        .and_then(|r| r.get_mut("attributes"))
    {
        if attributes.is_object() {
            let flat: IndexMap<String, Value> = serde_json::from_value(attributes.take())?;
            *attributes = Value::Array(
                flat.into_iter()
                    .map(|(name, value)| json!({ "name": name, "value": value }))
                    .collect(),
            );
        }
    }

    for provider in ["tracer_provider", "logger_provider"] {
        let processors = document
            .get_mut(provider)
            .and_then(|p| p.get_mut("processors"))
            .and_then(Value::as_array_mut);
        for processor in processors.into_iter().flatten() {
            for kind in ["batch", "simple"] {
                if let Some(otlp) = exporter_otlp(processor.get_mut(kind)) {
                    normalize_headers(otlp)?;
                }
            }
        }
    }

    if let Some(meter_provider) = document.get_mut("meter_provider") {
        let readers = meter_provider
            .get_mut("readers")
            .and_then(Value::as_array_mut);
        for reader in readers.into_iter().flatten() {
            if let Some(otlp) = exporter_otlp(reader.get_mut("periodic")) {
                normalize_headers(otlp)?;
            }
        }

        let views = meter_provider.get_mut("views").and_then(Value::as_array_mut);
        for view in views.into_iter().flatten() {
            if let Some(keys) = view
                .get_mut("stream")
                .and_then(|s| s.get_mut("attribute_keys"))
            {
                if keys.is_array() {
                    *keys = json!({ "included": keys.take() });
                }
            }
        }
    }

    Ok(())
}

fn exporter_otlp(holder: Option<&mut Value>) -> Option<&mut Value> {
    holder?.get_mut("exporter")?.get_mut("otlp")
}

fn normalize_headers(otlp: &mut Value) -> DecodeResult<()> {
    let Some(headers) = otlp.get_mut("headers") else {
        return Ok(());
    };
    if headers.is_object() {
        let flat: IndexMap<String, String> = serde_json::from_value(headers.take())?;
        *headers = Value::Array(
            flat.into_iter()
                .map(|(name, value)| json!({ "name": name, "value": value }))
                .collect(),
        );
    }
    Ok(())
}
