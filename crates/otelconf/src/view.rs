//! View compilation.
//!
//! A declared view becomes a [`CompiledView`], which the meter provider asks
//! for a stream override once per instrument. Matching is the conjunction of
//! every selector field that is set; an unset field matches anything.

use std::borrow::Cow;
use std::collections::HashSet;

use opentelemetry::Key;
use opentelemetry_sdk::metrics::{Aggregation, Instrument, InstrumentKind, Stream, View};
use otelconf_schema::exporter::IncludeExclude;
use otelconf_schema::metric::{
    AggregationKind, Base2ExponentialBucketHistogram, ExplicitBucketHistogram,
    View as ViewConfig, ViewSelector, ViewStream,
};
use otelconf_schema::OneOf;

use crate::error::{ConfigError, ConfigErrors};

const DEFAULT_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0,
    7500.0, 10000.0,
];
const DEFAULT_MAX_SIZE: u32 = 160;
const DEFAULT_MAX_SCALE: i8 = 20;

/// Maps an `instrument_type` value to the SDK kind.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidInstrumentType`] for unknown values.
pub fn instrument_kind(value: &str) -> Result<InstrumentKind, ConfigError> {
    match value {
        "counter" => Ok(InstrumentKind::Counter),
        "up_down_counter" => Ok(InstrumentKind::UpDownCounter),
        "histogram" => Ok(InstrumentKind::Histogram),
        "observable_counter" => Ok(InstrumentKind::ObservableCounter),
        "observable_up_down_counter" => Ok(InstrumentKind::ObservableUpDownCounter),
        "observable_gauge" => Ok(InstrumentKind::ObservableGauge),
        "gauge" => Ok(InstrumentKind::Gauge),
        other => Err(ConfigError::InvalidInstrumentType(other.to_string())),
    }
}

/// Selection criteria of a view.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    name: Option<String>,
    kind: Option<InstrumentKind>,
    unit: Option<String>,
    meter_name: Option<String>,
    meter_version: Option<String>,
    meter_schema_url: Option<String>,
}

impl Selector {
    fn from_config(selector: &ViewSelector) -> Result<Self, ConfigError> {
        Ok(Self {
            name: selector.instrument_name.clone(),
            kind: selector
                .instrument_type
                .as_deref()
                .map(instrument_kind)
                .transpose()?,
            unit: selector.unit.clone(),
            meter_name: selector.meter_name.clone(),
            meter_version: selector.meter_version.clone(),
            meter_schema_url: selector.meter_schema_url.clone(),
        })
    }

    /// Returns `true` when every set criterion holds for `instrument`.
    pub fn matches(&self, instrument: &Instrument) -> bool {
        let scope = &instrument.scope;
        self.name
            .as_deref()
            .map_or(true, |pattern| wildcard_match(pattern, &instrument.name))
            && self.kind.map_or(true, |kind| instrument.kind == Some(kind))
            && self
                .unit
                .as_deref()
                .map_or(true, |unit| unit == instrument.unit.as_ref())
            && self
                .meter_name
                .as_deref()
                .map_or(true, |name| name == scope.name())
            && self
                .meter_version
                .as_deref()
                .map_or(true, |version| Some(version) == scope.version())
            && self
                .meter_schema_url
                .as_deref()
                .map_or(true, |url| Some(url) == scope.schema_url())
    }

    fn has_wildcard(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| name.contains(['*', '?']))
    }
}

/// `*` matches any run of characters and `?` any single character.
pub(crate) fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Overrides applied to matched instruments.
#[derive(Debug, Clone, Default)]
struct StreamTemplate {
    name: Option<String>,
    description: Option<String>,
    aggregation: Option<Aggregation>,
    allowed_keys: Option<HashSet<Key>>,
}

impl StreamTemplate {
    fn from_config(stream: &ViewStream) -> Result<Self, ConfigError> {
        Ok(Self {
            name: stream.name.clone(),
            description: stream.description.clone(),
            aggregation: aggregation(&stream.aggregation)?,
            allowed_keys: stream
                .attribute_keys
                .as_ref()
                .map(allowed_keys)
                .transpose()?
                .flatten(),
        })
    }
}

/// Included keys minus excluded keys. Excluded keys always lose.
///
/// The SDK stream filter is an allow list, so exclusions need an `included`
/// list to subtract from.
fn allowed_keys(keys: &IncludeExclude) -> Result<Option<HashSet<Key>>, ConfigError> {
    let excluded: HashSet<&str> = keys
        .excluded
        .iter()
        .flatten()
        .map(String::as_str)
        .collect();

    let Some(included) = keys.included.as_ref() else {
        if excluded.is_empty() {
            return Ok(None);
        }
        return Err(ConfigError::ExcludedKeysWithoutIncluded);
    };

    Ok(Some(
        included
            .iter()
            .filter(|key| !excluded.contains(key.as_str()))
            .map(|key| Key::new(key.clone()))
            .collect(),
    ))
}

/// Converts an aggregation override. `None` keeps the instrument's default.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAggregation`] when several aggregations are
/// declared or a histogram setting is out of range.
pub fn aggregation(declared: &OneOf<AggregationKind>) -> Result<Option<Aggregation>, ConfigError> {
    let kind = match declared {
        OneOf::Empty => return Ok(None),
        OneOf::Many(_) => {
            return Err(ConfigError::InvalidAggregation(
                "must not specify multiple aggregations".to_string(),
            ))
        }
        OneOf::One(kind) => kind,
    };

    match kind {
        AggregationKind::Default(_) => Ok(None),
        AggregationKind::Drop(_) => Ok(Some(Aggregation::Drop)),
        AggregationKind::Sum(_) => Ok(Some(Aggregation::Sum)),
        AggregationKind::LastValue(_) => Ok(Some(Aggregation::LastValue)),
        AggregationKind::ExplicitBucketHistogram(histogram) => explicit(histogram).map(Some),
        AggregationKind::Base2ExponentialBucketHistogram(histogram) => {
            exponential(histogram).map(Some)
        }
    }
}

fn explicit(histogram: &ExplicitBucketHistogram) -> Result<Aggregation, ConfigError> {
    let boundaries = histogram
        .boundaries
        .clone()
        .unwrap_or_else(|| DEFAULT_BOUNDARIES.to_vec());
    if boundaries.iter().any(|b| !b.is_finite()) || boundaries.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::InvalidAggregation(
            "explicit bucket histogram boundaries must be finite and strictly increasing"
                .to_string(),
        ));
    }
    Ok(Aggregation::ExplicitBucketHistogram {
        boundaries,
        record_min_max: histogram.record_min_max.unwrap_or(true),
    })
}

fn exponential(histogram: &Base2ExponentialBucketHistogram) -> Result<Aggregation, ConfigError> {
    let max_size = match histogram.max_size {
        None => DEFAULT_MAX_SIZE,
        Some(size) => u32::try_from(size)
            .ok()
            .filter(|size| *size >= 2)
            .ok_or_else(|| ConfigError::InvalidAggregation(format!("invalid max_size {size}")))?,
    };
    let max_scale = match histogram.max_scale {
        None => DEFAULT_MAX_SCALE,
        Some(scale) => i8::try_from(scale)
            .ok()
            .filter(|scale| (-10..=20).contains(scale))
            .ok_or_else(|| {
                ConfigError::InvalidAggregation(format!("invalid max_scale {scale}"))
            })?,
    };
    Ok(Aggregation::Base2ExponentialHistogram {
        max_size,
        max_scale,
        record_min_max: histogram.record_min_max.unwrap_or(true),
    })
}

/// A validated view.
#[derive(Debug, Clone)]
pub struct CompiledView {
    selector: Selector,
    stream: StreamTemplate,
}

impl CompiledView {
    /// Validates `view`, reporting every mistake in it.
    ///
    /// # Errors
    ///
    /// Returns the selector, instrument type and aggregation errors found.
    pub fn compile(view: &ViewConfig) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();

        let selector = match view.selector.as_ref() {
            None => {
                errors.push(ConfigError::MissingViewSelector);
                None
            }
            Some(selector) if selector.is_empty() => {
                errors.push(ConfigError::EmptyViewSelector);
                None
            }
            Some(selector) => errors.collect(Selector::from_config(selector)),
        };
        let stream = errors.collect(
            view.stream
                .as_ref()
                .map_or_else(|| Ok(StreamTemplate::default()), StreamTemplate::from_config),
        );

        match (selector, stream) {
            (Some(selector), Some(mut stream)) if errors.is_empty() => {
                if selector.has_wildcard() && stream.name.is_some() {
                    tracing::warn!(
                        "a view selecting several instruments cannot rename them; keeping instrument names"
                    );
                    stream.name = None;
                }
                Ok(Self { selector, stream })
            }
            _ => Err(errors),
        }
    }

    /// The stream override for `instrument`, if the view selects it.
    pub fn stream_for(&self, instrument: &Instrument) -> Option<Stream> {
        if !self.selector.matches(instrument) {
            return None;
        }

        let template = &self.stream;
        let mut stream = Stream::new()
            .name(
                template
                    .name
                    .clone()
                    .map_or_else(|| instrument.name.clone(), Cow::Owned),
            )
            .description(
                template
                    .description
                    .clone()
                    .map_or_else(|| instrument.description.clone(), Cow::Owned),
            )
            .unit(instrument.unit.clone());
        if let Some(aggregation) = &template.aggregation {
            stream = stream.aggregation(aggregation.clone());
        }
        if let Some(keys) = &template.allowed_keys {
            stream = stream.allowed_attribute_keys(keys.iter().cloned());
        }
        Some(stream)
    }
}

impl View for CompiledView {
    fn match_inst(&self, instrument: &Instrument) -> Option<Stream> {
        self.stream_for(instrument)
    }
}
