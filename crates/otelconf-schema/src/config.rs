//! Document root and the settings shared by every signal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::log::LoggerProvider;
use crate::metric::MeterProvider;
use crate::trace::TracerProvider;

/// Root of a declarative configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Schema version the document was written against, e.g. `"0.3"`.
    pub file_format: String,

    /// Disables the whole SDK; every provider becomes a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,

    /// General attribute limits applied where a signal sets none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_limits: Option<AttributeLimits>,

    /// Resource describing the entity producing telemetry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,

    /// Context propagators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagator: Option<Propagator>,

    /// Trace pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracer_provider: Option<TracerProvider>,

    /// Metric pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_provider: Option<MeterProvider>,

    /// Log pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger_provider: Option<LoggerProvider>,
}

impl Configuration {
    /// Creates an empty document for the given schema version.
    pub fn new(file_format: impl Into<String>) -> Self {
        Self {
            file_format: file_format.into(),
            disabled: None,
            attribute_limits: None,
            resource: None,
            propagator: None,
            tracer_provider: None,
            meter_provider: None,
            logger_provider: None,
        }
    }

    /// Returns `true` when `disabled: true` is set.
    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }
}

/// Limits applied to attributes of every signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeLimits {
    /// Maximum length of string attribute values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_value_length_limit: Option<i64>,

    /// Maximum number of attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_count_limit: Option<i64>,
}

/// Declared resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Typed attributes, applied after `attributes_list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<AttributeNameValue>>,

    /// Attributes in `key=value,key2=value2` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_list: Option<String>,

    /// Schema URL of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,
}

/// A resource attribute with an optional declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeNameValue {
    /// Attribute key.
    pub name: String,

    /// Attribute value as written in the document.
    #[serde(default)]
    pub value: Value,

    /// Declared type; inferred from `value` when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AttributeType>,
}

impl AttributeNameValue {
    /// Creates an untyped attribute.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: None,
        }
    }

    /// Sets the declared type.
    #[must_use]
    pub fn with_kind(mut self, kind: AttributeType) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Declared attribute value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// UTF-8 string.
    String,
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Double,
    /// Array of strings.
    StringArray,
    /// Array of booleans.
    BoolArray,
    /// Array of integers.
    IntArray,
    /// Array of floats.
    DoubleArray,
}

/// Declared context propagators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propagator {
    /// Propagator names, in injection order. `null` entries are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<Vec<Option<String>>>,
}

impl Propagator {
    /// Creates a composite of the given names.
    pub fn composite<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            composite: Some(names.into_iter().map(|n| Some(n.into())).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_new_is_empty() {
        let config = Configuration::new("0.3");
        assert_eq!(config.file_format, "0.3");
        assert!(!config.is_disabled());
        assert!(config.tracer_provider.is_none());
    }

    #[test]
    fn test_attribute_type_names() {
        let kind: AttributeType = serde_json::from_str("\"string_array\"").unwrap();
        assert_eq!(kind, AttributeType::StringArray);
        assert!(serde_json::from_str::<AttributeType>("\"uint\"").is_err());
    }

    #[test]
    fn test_attribute_type_field_is_named_type() {
        let attr = AttributeNameValue::new("port", 8080).with_kind(AttributeType::Int);
        let json = serde_json::to_value(&attr).unwrap();
        assert_eq!(json["type"], "int");
        assert_eq!(json["value"], 8080);
    }

    #[test]
    fn test_missing_attribute_value_is_null() {
        let attr: AttributeNameValue = serde_json::from_str(r#"{"name": "a"}"#).unwrap();
        assert!(attr.value.is_null());
    }

    #[test]
    fn test_propagator_keeps_null_entries() {
        let p: Propagator =
            serde_json::from_str(r#"{"composite": ["tracecontext", null, "b3"]}"#).unwrap();
        assert_eq!(
            p.composite,
            Some(vec![Some("tracecontext".into()), None, Some("b3".into())])
        );
    }
}
