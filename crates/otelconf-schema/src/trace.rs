//! Tracer provider declarations.

use serde::{Deserialize, Serialize};

use crate::exporter::{Console, Otlp, Zipkin};
use crate::one_of::{Empty, OneOf, Variants};

/// Declared tracer provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerProvider {
    /// Span processors, each wrapping one exporter.
    #[serde(default)]
    pub processors: Vec<SpanProcessor>,

    /// Span limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<SpanLimits>,

    /// Root sampler. Defaults to `parent_based` with an `always_on` root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<Sampler>,
}

/// `batch` or `simple`.
pub type SpanProcessor = OneOf<SpanProcessorKind>;

/// Span processor alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanProcessorKind {
    /// Batches spans on a background task.
    Batch(BatchSpanProcessor),
    /// Exports each span as it ends.
    Simple(SimpleSpanProcessor),
}

impl Variants for SpanProcessorKind {
    const KIND: &'static str = "span processor";
    const KEYS: &'static [&'static str] = &["batch", "simple"];
}

/// Batch span processor settings. Durations are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSpanProcessor {
    /// Exporter receiving the batches.
    #[serde(default, skip_serializing_if = "OneOf::is_empty")]
    pub exporter: SpanExporter,

    /// Maximum time an export may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_timeout: Option<i64>,

    /// Maximum spans per export.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_export_batch_size: Option<i64>,

    /// Maximum queued spans before new ones are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<i64>,

    /// Delay between two consecutive exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_delay: Option<i64>,
}

/// Simple span processor settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleSpanProcessor {
    /// Exporter receiving each span.
    #[serde(default, skip_serializing_if = "OneOf::is_empty")]
    pub exporter: SpanExporter,
}

/// `console`, `otlp` or `zipkin`.
pub type SpanExporter = OneOf<SpanExporterKind>;

/// Span exporter alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanExporterKind {
    /// Pretty-printed spans on stdout.
    Console(Console),
    /// OTLP over gRPC or HTTP.
    Otlp(Otlp),
    /// Zipkin v2 JSON.
    Zipkin(Zipkin),
}

impl Variants for SpanExporterKind {
    const KIND: &'static str = "span exporter";
    const KEYS: &'static [&'static str] = &["console", "otlp", "zipkin"];
}

/// Span limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanLimits {
    /// Maximum length of string attribute values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_value_length_limit: Option<i64>,

    /// Maximum attributes per span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_count_limit: Option<i64>,

    /// Maximum events per span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_count_limit: Option<i64>,

    /// Maximum links per span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_count_limit: Option<i64>,

    /// Maximum attributes per event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_attribute_count_limit: Option<i64>,

    /// Maximum attributes per link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_attribute_count_limit: Option<i64>,
}

/// Recursive sampler declaration.
pub type Sampler = OneOf<SamplerKind>;

/// Sampler alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    /// Drops every span.
    AlwaysOff(Empty),
    /// Records every span.
    AlwaysOn(Empty),
    /// Remote sampling strategy served by a Jaeger agent.
    JaegerRemote(JaegerRemoteSampler),
    /// Delegates on the parent span's state.
    ParentBased(ParentBasedSampler),
    /// Samples a fixed fraction of trace ids.
    TraceIdRatioBased(TraceIdRatioBasedSampler),
}

impl Variants for SamplerKind {
    const KIND: &'static str = "sampler";
    const KEYS: &'static [&'static str] = &[
        "always_off",
        "always_on",
        "jaeger_remote",
        "parent_based",
        "trace_id_ratio_based",
    ];
}

/// Jaeger remote sampler settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JaegerRemoteSampler {
    /// Sampling strategy endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Polling interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,

    /// Sampler used until the first strategy arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_sampler: Option<Box<Sampler>>,
}

/// Parent-based sampler with one delegate per parent state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentBasedSampler {
    /// Used for root spans. Defaults to `always_on`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Box<Sampler>>,

    /// Remote sampled parent. Defaults to `always_on`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_parent_sampled: Option<Box<Sampler>>,

    /// Remote unsampled parent. Defaults to `always_off`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_parent_not_sampled: Option<Box<Sampler>>,

    /// Local sampled parent. Defaults to `always_on`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_parent_sampled: Option<Box<Sampler>>,

    /// Local unsampled parent. Defaults to `always_off`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_parent_not_sampled: Option<Box<Sampler>>,
}

/// Trace id ratio sampler settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceIdRatioBasedSampler {
    /// Fraction of traces to sample, `0.0..=1.0`. Defaults to `1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
}
