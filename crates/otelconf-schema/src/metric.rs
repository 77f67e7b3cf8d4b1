//! Meter provider declarations.

use serde::{Deserialize, Serialize};

use crate::exporter::{Console, IncludeExclude, Otlp};
use crate::one_of::{Empty, OneOf, Variants};

/// Declared meter provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterProvider {
    /// Metric readers.
    #[serde(default)]
    pub readers: Vec<MetricReader>,

    /// Views applied to every reader.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<View>,
}

/// `pull` or `periodic`.
pub type MetricReader = OneOf<MetricReaderKind>;

/// Metric reader alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricReaderKind {
    /// Pushes on a fixed interval.
    Periodic(PeriodicMetricReader),
    /// Collects on scrape.
    Pull(PullMetricReader),
}

impl Variants for MetricReaderKind {
    const KIND: &'static str = "metric reader";
    const KEYS: &'static [&'static str] = &["periodic", "pull"];
}

/// Periodic reader settings. Durations are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodicMetricReader {
    /// Push exporter.
    #[serde(default, skip_serializing_if = "OneOf::is_empty")]
    pub exporter: PushMetricExporter,

    /// Delay between two collections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,

    /// Maximum time a collection and export may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
}

/// Pull reader settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullMetricReader {
    /// Pull exporter.
    #[serde(default, skip_serializing_if = "OneOf::is_empty")]
    pub exporter: PullMetricExporter,
}

/// `console` or `otlp`.
pub type PushMetricExporter = OneOf<PushMetricExporterKind>;

/// Push exporter alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMetricExporterKind {
    /// Pretty-printed metrics on stdout.
    Console(Console),
    /// OTLP over gRPC or HTTP.
    Otlp(OtlpMetric),
}

impl Variants for PushMetricExporterKind {
    const KIND: &'static str = "metric exporter";
    const KEYS: &'static [&'static str] = &["console", "otlp"];
}

/// `prometheus`.
pub type PullMetricExporter = OneOf<PullMetricExporterKind>;

/// Pull exporter alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullMetricExporterKind {
    /// Prometheus text exposition over HTTP.
    Prometheus(Prometheus),
}

impl Variants for PullMetricExporterKind {
    const KIND: &'static str = "metric exporter";
    const KEYS: &'static [&'static str] = &["prometheus"];
}

/// OTLP metric exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtlpMetric {
    /// Transport settings shared with the other signals.
    #[serde(flatten)]
    pub otlp: Otlp,

    /// Aggregation temporality requested from the SDK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporality_preference: Option<TemporalityPreference>,

    /// Aggregation used for histograms without a view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_histogram_aggregation: Option<DefaultHistogramAggregation>,
}

impl From<Otlp> for OtlpMetric {
    fn from(otlp: Otlp) -> Self {
        Self {
            otlp,
            temporality_preference: None,
            default_histogram_aggregation: None,
        }
    }
}

/// Aggregation temporality preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalityPreference {
    /// Cumulative for every instrument.
    Cumulative,
    /// Delta for counters and histograms.
    Delta,
    /// Delta where it saves memory.
    LowMemory,
}

/// Default histogram aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultHistogramAggregation {
    /// Explicit bucket boundaries.
    ExplicitBucketHistogram,
    /// Base-2 exponential buckets.
    #[serde(rename = "base2_exponential_bucket_histogram")]
    Base2ExponentialBucketHistogram,
}

/// Prometheus pull exporter settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prometheus {
    /// Host the scrape endpoint binds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port the scrape endpoint binds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,

    /// Omit unit suffixes from metric names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub without_units: Option<bool>,

    /// Omit `_total` suffixes from counters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub without_type_suffix: Option<bool>,

    /// Omit `otel_scope_*` labels and the scope info metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub without_scope_info: Option<bool>,

    /// Resource attributes copied onto every series as labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_resource_constant_labels: Option<IncludeExclude>,
}

/// A view: which instruments it applies to and how their stream changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    /// Instrument selection; required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<ViewSelector>,

    /// Stream override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<ViewStream>,
}

/// Instrument selection criteria. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSelector {
    /// Instrument name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_name: Option<String>,

    /// Instrument type such as `counter` or `histogram`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_type: Option<String>,

    /// Instrument unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Meter name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_name: Option<String>,

    /// Meter version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_version: Option<String>,

    /// Meter schema URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_schema_url: Option<String>,
}

impl ViewSelector {
    /// Returns `true` when no criterion is set.
    pub fn is_empty(&self) -> bool {
        self.instrument_name.is_none()
            && self.instrument_type.is_none()
            && self.unit.is_none()
            && self.meter_name.is_none()
            && self.meter_version.is_none()
            && self.meter_schema_url.is_none()
    }
}

/// Stream override for matched instruments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewStream {
    /// New stream name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// New stream description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Aggregation override.
    #[serde(default, skip_serializing_if = "OneOf::is_empty")]
    pub aggregation: Aggregation,

    /// Attribute keys retained on the stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_keys: Option<IncludeExclude>,
}

/// Aggregation override.
pub type Aggregation = OneOf<AggregationKind>;

/// Aggregation alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Base-2 exponential histogram.
    #[serde(rename = "base2_exponential_bucket_histogram")]
    Base2ExponentialBucketHistogram(Base2ExponentialBucketHistogram),
    /// The instrument's default aggregation.
    Default(Empty),
    /// Discard all measurements.
    Drop(Empty),
    /// Explicit bucket histogram.
    ExplicitBucketHistogram(ExplicitBucketHistogram),
    /// Last recorded value.
    LastValue(Empty),
    /// Arithmetic sum.
    Sum(Empty),
}

impl Variants for AggregationKind {
    const KIND: &'static str = "aggregation";
    const KEYS: &'static [&'static str] = &[
        "base2_exponential_bucket_histogram",
        "default",
        "drop",
        "explicit_bucket_histogram",
        "last_value",
        "sum",
    ];
}

/// Base-2 exponential histogram settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base2ExponentialBucketHistogram {
    /// Maximum bucket scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<i64>,

    /// Maximum number of buckets per sign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,

    /// Record min and max values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_min_max: Option<bool>,
}

/// Explicit bucket histogram settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplicitBucketHistogram {
    /// Bucket boundaries, ascending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundaries: Option<Vec<f64>>,

    /// Record min and max values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_min_max: Option<bool>,
}
