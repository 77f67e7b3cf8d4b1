//! Batch processor tuning shared by spans and log records.

use std::time::Duration;

use crate::error::ConfigError;
use crate::otlp::millis;

/// Validated batch settings. `None` keeps the SDK default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTuning {
    max_export_batch_size: Option<usize>,
    export_timeout: Option<Duration>,
    max_queue_size: Option<usize>,
    schedule_delay: Option<Duration>,
}

impl BatchTuning {
    /// Validates the four tuning values.
    ///
    /// Values are checked in the order batch size, export timeout, queue size,
    /// schedule delay and the first negative one is reported. A zero size keeps
    /// the SDK default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTuningParameter`].
    pub fn new(
        max_export_batch_size: Option<i64>,
        export_timeout: Option<i64>,
        max_queue_size: Option<i64>,
        schedule_delay: Option<i64>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            max_export_batch_size: size("batch size", max_export_batch_size)?,
            export_timeout: export_timeout.map(|ms| millis("export timeout", ms)).transpose()?,
            max_queue_size: size("queue size", max_queue_size)?,
            schedule_delay: schedule_delay.map(|ms| millis("schedule delay", ms)).transpose()?,
        })
    }

    /// Span processor configuration.
    pub fn span_config(&self) -> opentelemetry_sdk::trace::BatchConfig {
        let mut builder = opentelemetry_sdk::trace::BatchConfigBuilder::default();
        if let Some(size) = self.max_queue_size {
            builder = builder.with_max_queue_size(size);
        }
        if let Some(size) = self.max_export_batch_size {
            builder = builder.with_max_export_batch_size(size);
        }
        if let Some(delay) = self.schedule_delay {
            builder = builder.with_scheduled_delay(delay);
        }
        if let Some(timeout) = self.export_timeout {
            builder = builder.with_max_export_timeout(timeout);
        }
        builder.build()
    }

    /// Log record processor configuration.
    pub fn log_config(&self) -> opentelemetry_sdk::logs::BatchConfig {
        let mut builder = opentelemetry_sdk::logs::BatchConfigBuilder::default();
        if let Some(size) = self.max_queue_size {
            builder = builder.with_max_queue_size(size);
        }
        if let Some(size) = self.max_export_batch_size {
            builder = builder.with_max_export_batch_size(size);
        }
        if let Some(delay) = self.schedule_delay {
            builder = builder.with_scheduled_delay(delay);
        }
        if let Some(timeout) = self.export_timeout {
            builder = builder.with_max_export_timeout(timeout);
        }
        builder.build()
    }
}

fn size(parameter: &'static str, value: Option<i64>) -> Result<Option<usize>, ConfigError> {
    match value {
        None | Some(0) => Ok(None),
        Some(value) => usize::try_from(value)
            .map(Some)
            .map_err(|_| ConfigError::tuning(parameter, value)),
    }
}
