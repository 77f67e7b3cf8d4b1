//! Logger provider declarations.

use serde::{Deserialize, Serialize};

use crate::exporter::{Console, Otlp};
use crate::one_of::{OneOf, Variants};

/// Declared logger provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggerProvider {
    /// Log record processors, each wrapping one exporter.
    #[serde(default)]
    pub processors: Vec<LogRecordProcessor>,

    /// Log record limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<LogRecordLimits>,
}

/// `batch` or `simple`.
pub type LogRecordProcessor = OneOf<LogRecordProcessorKind>;

/// Log record processor alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRecordProcessorKind {
    /// Batches records on a background task.
    Batch(BatchLogRecordProcessor),
    /// Exports each record as it is emitted.
    Simple(SimpleLogRecordProcessor),
}

impl Variants for LogRecordProcessorKind {
    const KIND: &'static str = "log record processor";
    const KEYS: &'static [&'static str] = &["batch", "simple"];
}

/// Batch log record processor settings. Durations are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchLogRecordProcessor {
    /// Exporter receiving the batches.
    #[serde(default, skip_serializing_if = "OneOf::is_empty")]
    pub exporter: LogRecordExporter,

    /// Maximum time an export may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_timeout: Option<i64>,

    /// Maximum records per export.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_export_batch_size: Option<i64>,

    /// Maximum queued records before new ones are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<i64>,

    /// Delay between two consecutive exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_delay: Option<i64>,
}

/// Simple log record processor settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleLogRecordProcessor {
    /// Exporter receiving each record.
    #[serde(default, skip_serializing_if = "OneOf::is_empty")]
    pub exporter: LogRecordExporter,
}

/// `console` or `otlp`.
pub type LogRecordExporter = OneOf<LogRecordExporterKind>;

/// Log record exporter alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRecordExporterKind {
    /// Pretty-printed records on stdout.
    Console(Console),
    /// OTLP over gRPC or HTTP.
    Otlp(Otlp),
}

impl Variants for LogRecordExporterKind {
    const KIND: &'static str = "log record exporter";
    const KEYS: &'static [&'static str] = &["console", "otlp"];
}

/// Log record limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecordLimits {
    /// Maximum length of string attribute values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_value_length_limit: Option<i64>,

    /// Maximum attributes per record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_count_limit: Option<i64>,
}
