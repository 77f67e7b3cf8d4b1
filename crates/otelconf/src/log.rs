//! Logger provider construction.

use opentelemetry_sdk::export::logs::LogExporter;
use opentelemetry_sdk::logs::{BatchLogProcessor, Builder, LoggerProvider};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::Resource;
use otelconf_schema::log::{
    LogRecordExporter, LogRecordExporterKind, LogRecordLimits, LogRecordProcessor,
    LogRecordProcessorKind, LoggerProvider as LoggerProviderConfig,
};
use otelconf_schema::{AttributeLimits, OneOf};

use crate::batch::BatchTuning;
use crate::error::{ConfigError, ConfigErrors, Signal};
use crate::offload::OnRuntime;
use crate::otlp::{OtlpSettings, Transport};
use crate::provider::{finish, require_runtime, BuildResult, SignalProvider};

/// Builds the logger provider.
///
/// # Errors
///
/// Returns a [`BuildError`](crate::BuildError) holding a no-op provider and
/// all processor and exporter errors.
pub fn build_logger_provider(
    declared: Option<&LoggerProviderConfig>,
    resource: &Resource,
    attribute_limits: Option<&AttributeLimits>,
) -> BuildResult<LoggerProvider> {
    build_logger_provider_with(
        declared,
        resource,
        attribute_limits,
        LoggerProvider::builder(),
    )
}

/// Like [`build_logger_provider`], starting from a caller-prepared builder.
///
/// Processors already on `builder` are kept and run ahead of the declared
/// ones. The declared resource replaces the builder's own.
///
/// # Errors
///
/// Same as [`build_logger_provider`].
pub fn build_logger_provider_with(
    declared: Option<&LoggerProviderConfig>,
    resource: &Resource,
    attribute_limits: Option<&AttributeLimits>,
    builder: Builder,
) -> BuildResult<LoggerProvider> {
    let Some(declared) = declared else {
        return Ok(SignalProvider::noop());
    };

    let mut errors = ConfigErrors::new();
    let mut builder = builder.with_resource(resource.clone());
    errors.collect(check_limits(declared.limits.as_ref(), attribute_limits));

    for processor in &declared.processors {
        match log_pipeline(processor) {
            Ok(pipeline) => builder = pipeline.attach(builder),
            Err(processor_errors) => errors.append(processor_errors),
        }
    }

    finish(builder.build(), errors)
}

enum LogPipeline {
    Simple(SimpleLogExporter),
    Batch(ConfiguredLogExporter, BatchTuning),
}

enum ConfiguredLogExporter {
    Console(opentelemetry_stdout::LogExporter),
    Otlp(opentelemetry_otlp::LogExporter),
}

enum SimpleLogExporter {
    Console(opentelemetry_stdout::LogExporter),
    Otlp(OnRuntime<opentelemetry_otlp::LogExporter>),
}

impl ConfiguredLogExporter {
    fn into_simple(self) -> Result<SimpleLogExporter, ConfigError> {
        Ok(match self {
            Self::Console(e) => SimpleLogExporter::Console(e),
            Self::Otlp(e) => SimpleLogExporter::Otlp(OnRuntime::current(
                e,
                "simple log record processor",
            )?),
        })
    }
}

impl LogPipeline {
    fn attach(self, builder: Builder) -> Builder {
        match self {
            Self::Simple(SimpleLogExporter::Console(e)) => builder.with_simple_exporter(e),
            Self::Simple(SimpleLogExporter::Otlp(e)) => builder.with_simple_exporter(e),
            Self::Batch(ConfiguredLogExporter::Console(e), tuning) => {
                builder.with_log_processor(batch(e, tuning))
            }
            Self::Batch(ConfiguredLogExporter::Otlp(e), tuning) => {
                builder.with_log_processor(batch(e, tuning))
            }
        }
    }
}

fn batch<E: LogExporter + 'static>(
    exporter: E,
    tuning: BatchTuning,
) -> BatchLogProcessor<runtime::Tokio> {
    BatchLogProcessor::builder(exporter, runtime::Tokio)
        .with_batch_config(tuning.log_config())
        .build()
}

fn log_pipeline(processor: &LogRecordProcessor) -> Result<LogPipeline, ConfigErrors> {
    let mut errors = ConfigErrors::new();
    match processor {
        OneOf::Empty => Err(ConfigError::UnsupportedProcessorType {
            signal: Signal::Log,
        }
        .into()),
        OneOf::Many(_) => Err(ConfigError::MultipleProcessorTypes {
            signal: Signal::Log,
        }
        .into()),
        OneOf::One(LogRecordProcessorKind::Simple(simple)) => {
            let exporter = log_exporter(&simple.exporter)?;
            Ok(LogPipeline::Simple(exporter.into_simple()?))
        }
        OneOf::One(LogRecordProcessorKind::Batch(batch)) => {
            let tuning = errors.collect(BatchTuning::new(
                batch.max_export_batch_size,
                batch.export_timeout,
                batch.max_queue_size,
                batch.schedule_delay,
            ));
            errors.collect(require_runtime("batch log record processor"));
            let exporter = errors.collect(log_exporter(&batch.exporter));
            match (exporter, tuning) {
                (Some(exporter), Some(tuning)) if errors.is_empty() => {
                    Ok(LogPipeline::Batch(exporter, tuning))
                }
                _ => Err(errors),
            }
        }
    }
}

fn log_exporter(declared: &LogRecordExporter) -> Result<ConfiguredLogExporter, ConfigErrors> {
    match declared {
        OneOf::Empty => Err(ConfigError::NoValidExporter {
            signal: Signal::Log,
        }
        .into()),
        OneOf::Many(_) => Err(ConfigError::MultipleExporters.into()),
        OneOf::One(LogRecordExporterKind::Console(_)) => Ok(ConfiguredLogExporter::Console(
            opentelemetry_stdout::LogExporter::default(),
        )),
        OneOf::One(LogRecordExporterKind::Otlp(otlp)) => {
            let settings = OtlpSettings::resolve(otlp)?;
            Ok(ConfiguredLogExporter::Otlp(otlp_log_exporter(&settings)?))
        }
    }
}

fn otlp_log_exporter(settings: &OtlpSettings) -> Result<opentelemetry_otlp::LogExporter, ConfigError> {
    let exporter = match settings.transport() {
        Transport::Grpc => settings
            .configure_tonic(opentelemetry_otlp::LogExporter::builder().with_tonic())?
            .build(),
        Transport::HttpProtobuf | Transport::HttpJson => settings
            .configure_http(
                opentelemetry_otlp::LogExporter::builder().with_http(),
                "/v1/logs",
            )?
            .build(),
    };
    exporter.map_err(|e| ConfigError::exporter("otlp log exporter", e))
}

/// Validates log record limits. The SDK has no per-record limits, so valid
/// values are only reported as ignored.
fn check_limits(
    limits: Option<&LogRecordLimits>,
    general: Option<&AttributeLimits>,
) -> Result<(), ConfigErrors> {
    let count = limits
        .and_then(|l| l.attribute_count_limit)
        .or_else(|| general.and_then(|g| g.attribute_count_limit));
    let length = limits
        .and_then(|l| l.attribute_value_length_limit)
        .or_else(|| general.and_then(|g| g.attribute_value_length_limit));

    let mut errors = ConfigErrors::new();
    for (parameter, value) in [
        ("attribute count limit", count),
        ("attribute value length limit", length),
    ] {
        match value {
            Some(value) if value < 0 => errors.push(ConfigError::tuning(parameter, value)),
            Some(value) => {
                tracing::warn!(limit = parameter, value, "log record limits are not supported; ignoring");
            }
            None => {}
        }
    }
    errors.into_result(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::logs::{LogRecord as _, Logger as _, LoggerProvider as _};
    use otelconf_schema::exporter::Otlp;
    use otelconf_schema::log::{BatchLogRecordProcessor, SimpleLogRecordProcessor};
    use otelconf_schema::Empty;

    fn simple(exporter: LogRecordExporterKind) -> LogRecordProcessor {
        OneOf::One(LogRecordProcessorKind::Simple(SimpleLogRecordProcessor {
            exporter: OneOf::One(exporter),
        }))
    }

    fn provider(processors: Vec<LogRecordProcessor>) -> LoggerProviderConfig {
        LoggerProviderConfig {
            processors,
            limits: None,
        }
    }

    fn build(config: &LoggerProviderConfig) -> BuildResult<LoggerProvider> {
        build_logger_provider(Some(config), &Resource::default(), None)
    }

    #[test]
    fn test_absent_declaration_is_noop() {
        assert!(build_logger_provider(None, &Resource::default(), None)
            .unwrap()
            .is_noop());
    }

    #[test]
    fn test_simple_console_processor() {
        let provider = build(&provider(vec![simple(LogRecordExporterKind::Console(Empty {}))]))
            .unwrap();
        let logger = provider.provider().logger("test");
        let mut record = logger.create_log_record();
        record.set_body("hello".into());
        logger.emit(record);
        provider.provider().shutdown().unwrap();
    }

    #[test]
    fn test_processor_structure_errors() {
        let config = provider(vec![
            OneOf::Empty,
            OneOf::Many(vec![
                LogRecordProcessorKind::Batch(BatchLogRecordProcessor::default()),
                LogRecordProcessorKind::Simple(SimpleLogRecordProcessor::default()),
            ]),
            OneOf::One(LogRecordProcessorKind::Simple(SimpleLogRecordProcessor::default())),
        ]);
        let err = build(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported log processor type, must be one of simple or batch\n\
             must not specify multiple log processor type\n\
             no valid log exporter"
        );
    }

    #[test]
    fn test_batch_without_runtime() {
        let processor = OneOf::One(LogRecordProcessorKind::Batch(BatchLogRecordProcessor {
            exporter: OneOf::One(LogRecordExporterKind::Console(Empty {})),
            ..BatchLogRecordProcessor::default()
        }));
        let err = build(&provider(vec![processor])).unwrap_err();
        assert!(matches!(
            err.errors().iter().next(),
            Some(ConfigError::MissingRuntime("batch log record processor"))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_otlp_processor() {
        let processor = OneOf::One(LogRecordProcessorKind::Batch(BatchLogRecordProcessor {
            exporter: OneOf::One(LogRecordExporterKind::Otlp(
                Otlp::new("http/protobuf").with_endpoint("localhost:4318"),
            )),
            schedule_delay: Some(1000),
            ..BatchLogRecordProcessor::default()
        }));
        let provider = build(&provider(vec![processor])).unwrap().into_inner();
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .unwrap()
            .ok();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_tuning_errors() {
        let processor = OneOf::One(LogRecordProcessorKind::Batch(BatchLogRecordProcessor {
            exporter: OneOf::One(LogRecordExporterKind::Console(Empty {})),
            max_queue_size: Some(-3),
            ..BatchLogRecordProcessor::default()
        }));
        let err = build(&provider(vec![processor])).unwrap_err();
        assert_eq!(err.to_string(), "invalid queue size -3");
    }

    #[test]
    fn test_unsupported_protocol() {
        let err = build(&provider(vec![simple(LogRecordExporterKind::Otlp(Otlp::new(
            "http/invalid",
        )))]))
        .unwrap_err();
        assert_eq!(err.to_string(), "unsupported protocol \"http/invalid\"");
    }

    #[test]
    fn test_simple_otlp_emits_outside_the_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let exporter = LogRecordExporterKind::Otlp(
            Otlp::new("http/protobuf").with_endpoint("127.0.0.1:1"),
        );
        let provider = {
            let _entered = runtime.enter();
            build(&provider(vec![simple(exporter)])).unwrap()
        };

        let logger = provider.provider().logger("test");
        let mut record = logger.create_log_record();
        record.set_body("unreachable collector".into());
        logger.emit(record);
        provider.provider().shutdown().unwrap();
    }

    #[test]
    fn test_simple_otlp_rejects_current_thread_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _entered = runtime.enter();
        let exporter = LogRecordExporterKind::Otlp(
            Otlp::new("http/json").with_endpoint("localhost:4318"),
        );
        let err = build(&provider(vec![simple(exporter)])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "simple log record processor requires a multi-threaded Tokio runtime"
        );
    }

    #[test]
    fn test_prepared_builder_keeps_its_processors() {
        use opentelemetry_sdk::testing::logs::InMemoryLogExporter;

        let exporter = InMemoryLogExporter::default();
        let builder = LoggerProvider::builder().with_simple_exporter(exporter.clone());
        let provider = build_logger_provider_with(
            Some(&provider(vec![simple(LogRecordExporterKind::Console(Empty {}))])),
            &Resource::default(),
            None,
            builder,
        )
        .unwrap();

        let logger = provider.provider().logger("test");
        logger.emit(logger.create_log_record());
        assert_eq!(exporter.get_emitted_logs().unwrap().len(), 1);
    }

    #[test]
    fn test_negative_limits_are_rejected() {
        let config = LoggerProviderConfig {
            processors: Vec::new(),
            limits: Some(LogRecordLimits {
                attribute_value_length_limit: Some(-1),
                attribute_count_limit: None,
            }),
        };
        let err = build(&config).unwrap_err();
        assert_eq!(err.to_string(), "invalid attribute value length limit -1");

        let general = AttributeLimits {
            attribute_count_limit: Some(128),
            attribute_value_length_limit: None,
        };
        assert!(check_limits(None, Some(&general)).is_ok());
    }
}
