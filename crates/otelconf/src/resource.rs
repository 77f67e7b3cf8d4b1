//! Resource construction.
//!
//! The declared resource is merged over a default resource (by default the
//! SDK's process resource, carrying `service.name` and `telemetry.sdk.*`).
//! Declared attributes win over default ones with the same key.

use opentelemetry::{Array, KeyValue, StringValue, Value};
use opentelemetry_sdk::Resource;
use otelconf_schema::{AttributeNameValue, AttributeType, Resource as ResourceConfig};
use serde_json::Value as Json;

use crate::error::{ConfigError, ConfigErrors};

/// Builds the resource shared by every provider.
///
/// # Errors
///
/// Returns every invalid attribute, plus [`ConfigError::SchemaConflict`] when
/// `default` and the declaration carry different schema URLs.
pub fn build_resource(
    declared: Option<&ResourceConfig>,
    default: &Resource,
) -> Result<Resource, ConfigErrors> {
    let Some(declared) = declared else {
        return Ok(default.clone());
    };

    let mut errors = ConfigErrors::new();
    let mut attributes = Vec::new();

    if let Some(list) = declared.attributes_list.as_deref() {
        attributes.extend(errors.collect(parse_attributes_list(list)).unwrap_or_default());
    }
    for attribute in declared.attributes.iter().flatten() {
        if let Some(value) = errors.collect(attribute_value(attribute)) {
            attributes.push(KeyValue::new(attribute.name.clone(), value));
        }
    }

    if let (Some(default_url), Some(declared_url)) =
        (default.schema_url(), declared.schema_url.as_deref())
    {
        if default_url != declared_url {
            errors.push(ConfigError::SchemaConflict {
                default: default_url.to_string(),
                declared: declared_url.to_string(),
            });
        }
    }

    let resource = match declared.schema_url.clone() {
        Some(url) => Resource::from_schema_url(attributes, url),
        None => Resource::new(attributes),
    };
    tracing::debug!(attributes = resource.len(), "built resource");

    errors.into_result(default.merge(&resource))
}

fn parse_attributes_list(list: &str) -> Result<Vec<KeyValue>, ConfigErrors> {
    let mut errors = ConfigErrors::new();
    let mut attributes = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                attributes.push(KeyValue::new(
                    key.trim().to_string(),
                    value.trim().to_string(),
                ));
            }
            _ => errors.push(ConfigError::invalid_attribute(
                entry,
                "attributes_list entries must be key=value",
            )),
        }
    }

    errors.into_result(attributes)
}

/// Converts a declared attribute into an SDK value.
///
/// Without a declared type the value is inferred: booleans, integers that fit
/// `i64`, floats, strings and homogeneous arrays map directly; anything else is
/// rendered as a string.
pub(crate) fn attribute_value(attribute: &AttributeNameValue) -> Result<Value, ConfigError> {
    if attribute.name.is_empty() {
        return Err(ConfigError::invalid_attribute("", "name must not be empty"));
    }
    if attribute.value.is_null() {
        return Err(ConfigError::invalid_attribute(
            &attribute.name,
            "value must not be null",
        ));
    }

    match attribute.kind {
        None => Ok(infer(&attribute.value)),
        Some(kind) => typed(kind, &attribute.value).ok_or_else(|| {
            ConfigError::invalid_attribute(
                &attribute.name,
                format!("value {} is not a valid {kind:?}", attribute.value),
            )
        }),
    }
}

fn infer(value: &Json) -> Value {
    match value {
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else if n.is_u64() {
                Value::String(n.to_string().into())
            } else {
                n.as_f64().map_or_else(|| Value::String(n.to_string().into()), Value::F64)
            }
        }
        Json::String(s) => Value::String(s.clone().into()),
        Json::Array(items) => infer_array(items).unwrap_or_else(|| Value::String(value.to_string().into())),
        Json::Null | Json::Object(_) => Value::String(value.to_string().into()),
    }
}

fn infer_array(items: &[Json]) -> Option<Value> {
    let first = items.first()?;
    match first {
        Json::Bool(_) => typed(AttributeType::BoolArray, &Json::Array(items.to_vec())),
        Json::String(_) => typed(AttributeType::StringArray, &Json::Array(items.to_vec())),
        Json::Number(_) if items.iter().all(|i| i.as_i64().is_some()) => {
            typed(AttributeType::IntArray, &Json::Array(items.to_vec()))
        }
        Json::Number(_) => typed(AttributeType::DoubleArray, &Json::Array(items.to_vec())),
        _ => None,
    }
}

fn typed(kind: AttributeType, value: &Json) -> Option<Value> {
    match kind {
        AttributeType::String => Some(Value::String(scalar_string(value)?)),
        AttributeType::Bool => value.as_bool().map(Value::Bool),
        AttributeType::Int => value.as_i64().map(Value::I64),
        AttributeType::Double => value.as_f64().map(Value::F64),
        AttributeType::StringArray => Some(Value::Array(Array::String(
            each(value, scalar_string)?,
        ))),
        AttributeType::BoolArray => Some(Value::Array(Array::Bool(each(value, Json::as_bool)?))),
        AttributeType::IntArray => Some(Value::Array(Array::I64(each(value, Json::as_i64)?))),
        AttributeType::DoubleArray => Some(Value::Array(Array::F64(each(value, Json::as_f64)?))),
    }
}

fn scalar_string(value: &Json) -> Option<StringValue> {
    match value {
        Json::String(s) => Some(s.clone().into()),
        Json::Bool(_) | Json::Number(_) => Some(value.to_string().into()),
        _ => None,
    }
}

fn each<T>(value: &Json, convert: impl Fn(&Json) -> Option<T>) -> Option<Vec<T>> {
    value.as_array()?.iter().map(convert).collect()
}
