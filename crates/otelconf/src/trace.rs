//! Tracer provider construction.

use opentelemetry::Key;
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{BatchSpanProcessor, Builder, TracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use otelconf_schema::exporter::Zipkin;
use otelconf_schema::trace::{
    SpanExporter as SpanExporterConfig, SpanExporterKind, SpanLimits, SpanProcessor,
    SpanProcessorKind, TracerProvider as TracerProviderConfig,
};
use otelconf_schema::{AttributeLimits, OneOf};

use crate::batch::BatchTuning;
use crate::error::{ConfigError, ConfigErrors, Signal};
use crate::offload::OnRuntime;
use crate::otlp::{millis, parse_endpoint, OtlpSettings, Transport};
use crate::provider::{finish, require_runtime, BuildResult, SignalProvider};
use crate::sampler::build_sampler;
use crate::tls::TlsMaterial;

/// Builds the tracer provider.
///
/// Every processor is validated and every mistake is reported; the provider
/// is only returned when there are none.
///
/// # Errors
///
/// Returns a [`BuildError`](crate::BuildError) holding a no-op provider and
/// all processor, exporter, sampler and limit errors.
pub fn build_tracer_provider(
    declared: Option<&TracerProviderConfig>,
    resource: &Resource,
    attribute_limits: Option<&AttributeLimits>,
) -> BuildResult<TracerProvider> {
    build_tracer_provider_with(
        declared,
        resource,
        attribute_limits,
        TracerProvider::builder(),
    )
}

/// Like [`build_tracer_provider`], starting from a caller-prepared builder.
///
/// Processors, ID generators and other settings already on `builder` are
/// kept. The declared resource, sampler and limits replace the builder's
/// own. An absent declaration still yields the no-op provider.
///
/// # Errors
///
/// Same as [`build_tracer_provider`].
pub fn build_tracer_provider_with(
    declared: Option<&TracerProviderConfig>,
    resource: &Resource,
    attribute_limits: Option<&AttributeLimits>,
    builder: Builder,
) -> BuildResult<TracerProvider> {
    let Some(declared) = declared else {
        return Ok(SignalProvider::noop());
    };

    let mut errors = ConfigErrors::new();
    let mut builder = builder.with_resource(resource.clone());

    if let Some(sampler) = errors.collect(build_sampler(declared.sampler.as_ref())) {
        builder = builder.with_sampler(sampler);
    }
    if let Some(limits) = errors.collect(SpanLimitSettings::new(
        declared.limits.as_ref(),
        attribute_limits,
    )) {
        builder = limits.apply(builder);
    }

    for processor in &declared.processors {
        match span_pipeline(processor, resource) {
            Ok(pipeline) => builder = pipeline.attach(builder),
            Err(processor_errors) => errors.append(processor_errors),
        }
    }

    finish(builder.build(), errors)
}

/// A validated processor with its exporter already constructed.
enum SpanPipeline {
    Simple(SimpleSpanExporter),
    Batch(ConfiguredSpanExporter, BatchTuning),
}

enum ConfiguredSpanExporter {
    Console(opentelemetry_stdout::SpanExporter),
    Otlp(opentelemetry_otlp::SpanExporter),
    Zipkin(opentelemetry_zipkin::Exporter),
}

/// Exporters as a simple processor runs them: network exporters are bound
/// to the runtime so a span can end on any thread.
enum SimpleSpanExporter {
    Console(opentelemetry_stdout::SpanExporter),
    Otlp(OnRuntime<opentelemetry_otlp::SpanExporter>),
    Zipkin(OnRuntime<opentelemetry_zipkin::Exporter>),
}

impl SpanPipeline {
    fn attach(self, builder: Builder) -> Builder {
        match self {
            Self::Simple(exporter) => match exporter {
                SimpleSpanExporter::Console(e) => builder.with_simple_exporter(e),
                SimpleSpanExporter::Otlp(e) => builder.with_simple_exporter(e),
                SimpleSpanExporter::Zipkin(e) => builder.with_simple_exporter(e),
            },
            Self::Batch(exporter, tuning) => match exporter {
                ConfiguredSpanExporter::Console(e) => builder.with_span_processor(batch(e, tuning)),
                ConfiguredSpanExporter::Otlp(e) => builder.with_span_processor(batch(e, tuning)),
                ConfiguredSpanExporter::Zipkin(e) => builder.with_span_processor(batch(e, tuning)),
            },
        }
    }
}

fn batch<E: SpanExporter + 'static>(
    exporter: E,
    tuning: BatchTuning,
) -> BatchSpanProcessor<runtime::Tokio> {
    BatchSpanProcessor::builder(exporter, runtime::Tokio)
        .with_batch_config(tuning.span_config())
        .build()
}

fn span_pipeline(processor: &SpanProcessor, resource: &Resource) -> Result<SpanPipeline, ConfigErrors> {
    let (exporter, tuning) = match processor {
        OneOf::Empty => {
            return Err(ConfigError::UnsupportedProcessorType {
                signal: Signal::Span,
            }
            .into())
        }
        OneOf::Many(_) => {
            return Err(ConfigError::MultipleProcessorTypes {
                signal: Signal::Span,
            }
            .into())
        }
        OneOf::One(SpanProcessorKind::Simple(simple)) => (&simple.exporter, None),
        OneOf::One(SpanProcessorKind::Batch(batch)) => (
            &batch.exporter,
            Some(BatchTuning::new(
                batch.max_export_batch_size,
                batch.export_timeout,
                batch.max_queue_size,
                batch.schedule_delay,
            )),
        ),
    };

    let mut errors = ConfigErrors::new();
    let tuning = match tuning {
        None => None,
        Some(tuning) => {
            let tuning = errors.collect(tuning);
            errors.collect(require_runtime("batch span processor"));
            tuning
        }
    };
    let exporter = errors.collect(span_exporter(exporter, resource));

    match (exporter, tuning) {
        (Some(exporter), None) if errors.is_empty() => {
            Ok(SpanPipeline::Simple(exporter.into_simple()?))
        }
        (Some(exporter), Some(tuning)) if errors.is_empty() => {
            Ok(SpanPipeline::Batch(exporter, tuning))
        }
        _ => Err(errors),
    }
}

fn span_exporter(
    declared: &SpanExporterConfig,
    resource: &Resource,
) -> Result<ConfiguredSpanExporter, ConfigErrors> {
    let kind = match declared {
        OneOf::Empty => {
            return Err(ConfigError::NoValidExporter {
                signal: Signal::Span,
            }
            .into())
        }
        OneOf::Many(_) => return Err(ConfigError::MultipleExporters.into()),
        OneOf::One(kind) => kind,
    };

    let exporter = match kind {
        SpanExporterKind::Console(_) => {
            ConfiguredSpanExporter::Console(opentelemetry_stdout::SpanExporter::default())
        }
        SpanExporterKind::Otlp(otlp) => {
            let settings = OtlpSettings::resolve(otlp)?;
            ConfiguredSpanExporter::Otlp(otlp_span_exporter(&settings)?)
        }
        SpanExporterKind::Zipkin(zipkin) => {
            ConfiguredSpanExporter::Zipkin(zipkin_exporter(zipkin, resource)?)
        }
    };
    tracing::debug!(exporter = exporter.name(), "built span exporter");
    Ok(exporter)
}

impl ConfiguredSpanExporter {
    fn name(&self) -> &'static str {
        match self {
            Self::Console(_) => "console",
            Self::Otlp(_) => "otlp",
            Self::Zipkin(_) => "zipkin",
        }
    }

    fn into_simple(self) -> Result<SimpleSpanExporter, ConfigError> {
        const COMPONENT: &str = "simple span processor";
        Ok(match self {
            Self::Console(e) => SimpleSpanExporter::Console(e),
            Self::Otlp(e) => SimpleSpanExporter::Otlp(OnRuntime::current(e, COMPONENT)?),
            Self::Zipkin(e) => SimpleSpanExporter::Zipkin(OnRuntime::current(e, COMPONENT)?),
        })
    }
}

fn otlp_span_exporter(
    settings: &OtlpSettings,
) -> Result<opentelemetry_otlp::SpanExporter, ConfigError> {
    let exporter = match settings.transport() {
        Transport::Grpc => settings
            .configure_tonic(opentelemetry_otlp::SpanExporter::builder().with_tonic())?
            .build(),
        Transport::HttpProtobuf | Transport::HttpJson => settings
            .configure_http(
                opentelemetry_otlp::SpanExporter::builder().with_http(),
                "/v1/traces",
            )?
            .build(),
    };
    exporter.map_err(|e| ConfigError::exporter("otlp span exporter", e))
}

fn zipkin_exporter(
    zipkin: &Zipkin,
    resource: &Resource,
) -> Result<opentelemetry_zipkin::Exporter, ConfigErrors> {
    let mut errors = ConfigErrors::new();
    errors.collect(parse_endpoint(&zipkin.endpoint));
    let timeout = errors.collect(zipkin.timeout.map(|ms| millis("timeout", ms)).transpose());
    let Some(timeout) = timeout else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let client = TlsMaterial::default().http_client(timeout)?;
    let service_name = resource
        .get(Key::from_static_str(SERVICE_NAME))
        .map_or_else(|| "unknown_service".to_string(), |name| name.to_string());

    opentelemetry_zipkin::new_pipeline()
        .with_service_name(service_name)
        .with_collector_endpoint(zipkin.endpoint.clone())
        .with_http_client(client)
        .init_exporter()
        .map_err(|e| ConfigError::exporter("zipkin exporter", e).into())
}

/// Span limits after validation, falling back to the document-wide
/// attribute limits.
#[derive(Debug, Default)]
struct SpanLimitSettings {
    attributes_per_span: Option<u32>,
    events_per_span: Option<u32>,
    links_per_span: Option<u32>,
    attributes_per_event: Option<u32>,
    attributes_per_link: Option<u32>,
}

impl SpanLimitSettings {
    fn new(
        limits: Option<&SpanLimits>,
        general: Option<&AttributeLimits>,
    ) -> Result<Self, ConfigErrors> {
        let limits = limits.cloned().unwrap_or_default();
        let mut errors = ConfigErrors::new();

        let attribute_count = limits
            .attribute_count_limit
            .or_else(|| general.and_then(|g| g.attribute_count_limit));
        if limits
            .attribute_value_length_limit
            .or_else(|| general.and_then(|g| g.attribute_value_length_limit))
            .is_some()
        {
            tracing::warn!("attribute_value_length_limit is not supported for spans; ignoring");
        }

        let settings = Self {
            attributes_per_span: errors
                .collect(limit("attribute count limit", attribute_count))
                .flatten(),
            events_per_span: errors
                .collect(limit("event count limit", limits.event_count_limit))
                .flatten(),
            links_per_span: errors
                .collect(limit("link count limit", limits.link_count_limit))
                .flatten(),
            attributes_per_event: errors
                .collect(limit(
                    "event attribute count limit",
                    limits.event_attribute_count_limit,
                ))
                .flatten(),
            attributes_per_link: errors
                .collect(limit(
                    "link attribute count limit",
                    limits.link_attribute_count_limit,
                ))
                .flatten(),
        };
        errors.into_result(settings)
    }

    fn apply(&self, mut builder: Builder) -> Builder {
        if let Some(max) = self.attributes_per_span {
            builder = builder.with_max_attributes_per_span(max);
        }
        if let Some(max) = self.events_per_span {
            builder = builder.with_max_events_per_span(max);
        }
        if let Some(max) = self.links_per_span {
            builder = builder.with_max_links_per_span(max);
        }
        if let Some(max) = self.attributes_per_event {
            builder = builder.with_max_attributes_per_event(max);
        }
        if let Some(max) = self.attributes_per_link {
            builder = builder.with_max_attributes_per_link(max);
        }
        builder
    }
}

fn limit(parameter: &'static str, value: Option<i64>) -> Result<Option<u32>, ConfigError> {
    value
        .map(|v| u32::try_from(v).map_err(|_| ConfigError::tuning(parameter, v)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span, Tracer, TracerProvider as _};
    use otelconf_schema::exporter::Otlp;
    use otelconf_schema::trace::{BatchSpanProcessor as BatchConfig, SimpleSpanProcessor};
    use otelconf_schema::Empty;

    fn simple(exporter: SpanExporterKind) -> SpanProcessor {
        OneOf::One(SpanProcessorKind::Simple(SimpleSpanProcessor {
            exporter: OneOf::One(exporter),
        }))
    }

    fn console() -> SpanExporterKind {
        SpanExporterKind::Console(Empty {})
    }

    fn provider(processors: Vec<SpanProcessor>) -> TracerProviderConfig {
        TracerProviderConfig {
            processors,
            ..TracerProviderConfig::default()
        }
    }

    fn build(config: &TracerProviderConfig) -> BuildResult<TracerProvider> {
        build_tracer_provider(Some(config), &Resource::default(), None)
    }

    #[test]
    fn test_absent_declaration_is_noop() {
        let provider = build_tracer_provider(None, &Resource::default(), None).unwrap();
        assert!(provider.is_noop());
    }

    #[test]
    fn test_simple_console_processor() {
        let provider = build(&provider(vec![simple(console())])).unwrap();
        assert!(!provider.is_noop());
        let mut span = provider.provider().tracer("test").start("span");
        assert!(span.is_recording());
        span.end();
        provider.provider().shutdown().unwrap();
    }

    #[test]
    fn test_multiple_processor_types() {
        let processor = OneOf::Many(vec![
            SpanProcessorKind::Batch(BatchConfig::default()),
            SpanProcessorKind::Simple(SimpleSpanProcessor::default()),
        ]);
        let err = build(&provider(vec![processor])).unwrap_err();
        assert!(err
            .to_string()
            .contains("must not specify multiple span processor type"));
        assert!(err.into_noop().is_noop());
    }

    #[test]
    fn test_empty_processor_and_exporter() {
        let config = provider(vec![
            OneOf::Empty,
            OneOf::One(SpanProcessorKind::Simple(SimpleSpanProcessor::default())),
        ]);
        let err = build(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported span processor type, must be one of simple or batch\nno valid span exporter"
        );
    }

    #[test]
    fn test_multiple_exporters() {
        let processor = OneOf::One(SpanProcessorKind::Simple(SimpleSpanProcessor {
            exporter: OneOf::Many(vec![console(), SpanExporterKind::Otlp(Otlp::new("grpc"))]),
        }));
        let err = build(&provider(vec![processor])).unwrap_err();
        assert_eq!(err.to_string(), "must not specify multiple exporters");
    }

    #[test]
    fn test_batch_tuning_and_exporter_errors_are_both_reported() {
        let processor = OneOf::One(SpanProcessorKind::Batch(BatchConfig {
            exporter: OneOf::One(SpanExporterKind::Otlp(
                Otlp::new("http/protobuf").with_compression("invalid"),
            )),
            max_export_batch_size: Some(-1),
            ..BatchConfig::default()
        }));
        let err = build(&provider(vec![processor])).unwrap_err();
        let messages: Vec<String> = err.errors().iter().map(ToString::to_string).collect();
        assert!(messages.contains(&"invalid batch size -1".to_string()));
        assert!(messages.contains(&"unsupported compression \"invalid\"".to_string()));
    }

    #[test]
    fn test_batch_without_runtime() {
        let processor = OneOf::One(SpanProcessorKind::Batch(BatchConfig {
            exporter: OneOf::One(console()),
            ..BatchConfig::default()
        }));
        let err = build(&provider(vec![processor])).unwrap_err();
        assert!(matches!(
            err.errors().iter().next(),
            Some(ConfigError::MissingRuntime("batch span processor"))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_otlp_http_endpoint_without_scheme() {
        let exporter = SpanExporterKind::Otlp(
            Otlp::new("http/protobuf").with_endpoint("localhost:4318"),
        );
        let provider = build(&provider(vec![simple(exporter)])).unwrap();
        assert!(!provider.is_noop());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zipkin_exporter() {
        let exporter = SpanExporterKind::Zipkin(Zipkin {
            endpoint: "http://localhost:9411/api/v2/spans".into(),
            timeout: Some(10_000),
        });
        let provider = build(&provider(vec![simple(exporter)])).unwrap();
        assert!(!provider.is_noop());
    }

    #[test]
    fn test_simple_http_span_ends_outside_the_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let exporter = SpanExporterKind::Otlp(
            Otlp::new("http/protobuf").with_endpoint("127.0.0.1:1"),
        );
        let provider = {
            let _entered = runtime.enter();
            build(&provider(vec![simple(exporter)])).unwrap()
        };

        // Nothing listens on the port; the export fails without panicking.
        let mut span = provider.provider().tracer("test").start("span");
        span.end();
        provider.provider().shutdown().unwrap();
    }

    #[test]
    fn test_simple_network_exporter_needs_a_runtime() {
        let exporter = SpanExporterKind::Otlp(
            Otlp::new("http/protobuf").with_endpoint("localhost:4318"),
        );
        let err = build(&provider(vec![simple(exporter)])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "simple span processor requires a Tokio runtime"
        );
    }

    #[test]
    fn test_simple_network_exporter_rejects_current_thread_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _entered = runtime.enter();
        let exporter = SpanExporterKind::Zipkin(Zipkin {
            endpoint: "http://localhost:9411/api/v2/spans".into(),
            timeout: None,
        });
        let err = build(&provider(vec![simple(exporter)])).unwrap_err();
        assert!(matches!(
            err.errors().iter().next(),
            Some(ConfigError::CurrentThreadRuntime("simple span processor"))
        ));
    }

    #[test]
    fn test_prepared_builder_keeps_its_processors() {
        use opentelemetry_sdk::testing::trace::InMemorySpanExporter;

        let exporter = InMemorySpanExporter::default();
        let builder = TracerProvider::builder().with_simple_exporter(exporter.clone());
        let provider = build_tracer_provider_with(
            Some(&provider(vec![simple(console())])),
            &Resource::default(),
            None,
            builder,
        )
        .unwrap();

        provider.provider().tracer("test").start("span").end();
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "span");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_otlp_grpc_processor() {
        let processor = OneOf::One(SpanProcessorKind::Batch(BatchConfig {
            exporter: OneOf::One(SpanExporterKind::Otlp(
                Otlp::new("grpc").with_endpoint("localhost:4317"),
            )),
            schedule_delay: Some(5000),
            ..BatchConfig::default()
        }));
        let provider = build(&provider(vec![processor])).unwrap().into_inner();
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .unwrap()
            .ok();
    }

    #[test]
    fn test_invalid_limits() {
        let config = TracerProviderConfig {
            limits: Some(SpanLimits {
                event_count_limit: Some(-1),
                link_count_limit: Some(-2),
                ..SpanLimits::default()
            }),
            ..TracerProviderConfig::default()
        };
        let err = build(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid event count limit -1\ninvalid link count limit -2"
        );
    }

    #[test]
    fn test_general_attribute_limit_applies_to_spans() {
        let limits = SpanLimitSettings::new(
            None,
            Some(&AttributeLimits {
                attribute_count_limit: Some(16),
                attribute_value_length_limit: None,
            }),
        )
        .unwrap();
        assert_eq!(limits.attributes_per_span, Some(16));
    }

    #[test]
    fn test_invalid_sampler_is_reported() {
        let config = TracerProviderConfig {
            sampler: Some(OneOf::Empty),
            ..TracerProviderConfig::default()
        };
        let err = build(&config).unwrap_err();
        assert_eq!(err.to_string(), "invalid config: sampler configuration");
    }
}
