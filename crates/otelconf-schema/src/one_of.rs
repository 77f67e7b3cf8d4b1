//! Mutually exclusive variant selection.
//!
//! Configuration documents express "exactly one of" choices as a mapping with
//! one key per alternative:
//!
//! ```yaml
//! exporter:
//!   otlp:
//!     protocol: grpc
//! ```
//!
//! [`OneOf`] captures how many alternatives a mapping actually selected. A
//! document naming two exporters still decodes; the builder reports it together
//! with every other mistake in the document instead of aborting the load.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An externally tagged enum whose tags are configuration keys.
pub trait Variants: Serialize + DeserializeOwned {
    /// Name used in error messages, e.g. `span exporter`.
    const KIND: &'static str;

    /// Keys selecting a variant.
    const KEYS: &'static [&'static str];
}

/// The alternatives selected by a configuration mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOf<T> {
    /// No known alternative was present.
    Empty,
    /// Exactly one alternative was present.
    One(T),
    /// More than one alternative was present, in key order.
    Many(Vec<T>),
}

impl<T> Default for OneOf<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T> From<T> for OneOf<T> {
    fn from(value: T) -> Self {
        Self::One(value)
    }
}

impl<T> OneOf<T> {
    /// Returns `true` when no alternative was selected.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Number of selected alternatives.
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::One(_) => 1,
            Self::Many(all) => all.len(),
        }
    }

    /// The selected alternative when exactly one was given.
    pub fn as_one(&self) -> Option<&T> {
        match self {
            Self::One(value) => Some(value),
            _ => None,
        }
    }

    fn from_selected(mut selected: Vec<T>) -> Self {
        match selected.len() {
            0 => Self::Empty,
            1 => selected.pop().map_or(Self::Empty, Self::One),
            _ => Self::Many(selected),
        }
    }
}

impl<'de, T: Variants> Deserialize<'de> for OneOf<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default();

        let mut selected = Vec::new();
        for key in T::KEYS {
            let Some(payload) = map.get(*key) else {
                continue;
            };
            // `console:` with no body is how YAML spells an empty mapping.
            let payload = match payload {
                Value::Null => Value::Object(Map::new()),
                other => other.clone(),
            };
            let mut tagged = Map::new();
            tagged.insert((*key).to_string(), payload);
            let variant = serde_json::from_value(Value::Object(tagged))
                .map_err(|e| de::Error::custom(format!("{} {key}: {e}", T::KIND)))?;
            selected.push(variant);
        }

        Ok(Self::from_selected(selected))
    }
}

impl<T: Variants> Serialize for OneOf<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::One(value) => value.serialize(serializer),
            Self::Empty => Map::new().serialize(serializer),
            Self::Many(values) => {
                let mut merged = Map::new();
                for value in values {
                    match serde_json::to_value(value).map_err(ser::Error::custom)? {
                        Value::Object(entries) => merged.extend(entries),
                        other => {
                            return Err(ser::Error::custom(format!(
                                "{} serialized to a non-mapping value: {other}",
                                T::KIND
                            )))
                        }
                    }
                }
                merged.serialize(serializer)
            }
        }
    }
}

/// A variant payload carrying no settings, such as `always_on: {}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}
