//! Meter provider construction.

use std::time::Duration;

use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{
    MeterProviderBuilder, PeriodicReader, SdkMeterProvider, Temporality,
};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::Resource;
use otelconf_schema::metric::{
    DefaultHistogramAggregation, MeterProvider as MeterProviderConfig, MetricReader,
    MetricReaderKind, OtlpMetric, PeriodicMetricReader, PullMetricExporterKind,
    PushMetricExporter as PushExporterConfig, PushMetricExporterKind, TemporalityPreference,
};
use otelconf_schema::OneOf;

use crate::error::{ConfigError, ConfigErrors, Signal};
use crate::otlp::{millis, OtlpSettings, Transport};
use crate::scrape::{build_prometheus, PrometheusReader, ScrapeEndpoint};
use crate::provider::{finish, require_runtime, BuildResult, Noop, SignalProvider};
use crate::view::CompiledView;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A meter provider and the scrape endpoints serving its pull readers.
#[derive(Debug)]
pub struct MeterProviderHandle {
    provider: SdkMeterProvider,
    scrape_endpoints: Vec<ScrapeEndpoint>,
}

impl MeterProviderHandle {
    /// The SDK provider.
    pub fn provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// Endpoints of the prometheus readers, in declaration order.
    pub fn scrape_endpoints(&self) -> &[ScrapeEndpoint] {
        &self.scrape_endpoints
    }

    /// Splits into the provider and its endpoints.
    pub fn into_parts(self) -> (SdkMeterProvider, Vec<ScrapeEndpoint>) {
        (self.provider, self.scrape_endpoints)
    }
}

impl Noop for MeterProviderHandle {
    const NAME: &'static str = SdkMeterProvider::NAME;

    fn noop() -> Self {
        Self {
            provider: SdkMeterProvider::noop(),
            scrape_endpoints: Vec::new(),
        }
    }

    fn shutdown_provider(&self) -> Result<(), String> {
        self.provider.shutdown_provider()
    }
}

/// Builds the meter provider.
///
/// # Errors
///
/// Returns a [`BuildError`](crate::BuildError) holding a no-op provider and
/// every reader, exporter and view error.
pub fn build_meter_provider(
    declared: Option<&MeterProviderConfig>,
    resource: &Resource,
) -> BuildResult<MeterProviderHandle> {
    build_meter_provider_with(declared, resource, SdkMeterProvider::builder())
}

/// Like [`build_meter_provider`], starting from a caller-prepared builder.
///
/// Readers and views already on `builder` are kept alongside the declared
/// ones. The declared resource replaces the builder's own.
///
/// # Errors
///
/// Same as [`build_meter_provider`].
pub fn build_meter_provider_with(
    declared: Option<&MeterProviderConfig>,
    resource: &Resource,
    builder: MeterProviderBuilder,
) -> BuildResult<MeterProviderHandle> {
    let Some(declared) = declared else {
        return Ok(SignalProvider::noop());
    };

    let mut errors = ConfigErrors::new();
    let mut builder = builder.with_resource(resource.clone());
    let mut scrape_endpoints = Vec::new();

    for reader in &declared.readers {
        match metric_pipeline(reader, resource) {
            Ok(MetricPipeline::Periodic(reader)) => builder = reader.attach(builder),
            Ok(MetricPipeline::Pull(PrometheusReader { exporter, endpoint })) => {
                builder = builder.with_reader(exporter);
                scrape_endpoints.push(endpoint);
            }
            Err(reader_errors) => errors.append(reader_errors),
        }
    }

    for view in &declared.views {
        if let Some(view) = errors.collect(CompiledView::compile(view)) {
            builder = builder.with_view(view);
        }
    }

    finish(
        MeterProviderHandle {
            provider: builder.build(),
            scrape_endpoints,
        },
        errors,
    )
}

enum MetricPipeline {
    Periodic(PeriodicPipeline),
    Pull(PrometheusReader),
}

struct PeriodicPipeline {
    exporter: ConfiguredPushExporter,
    interval: Duration,
    timeout: Duration,
}

enum ConfiguredPushExporter {
    Console(opentelemetry_stdout::MetricExporter),
    Otlp(opentelemetry_otlp::MetricExporter),
}

impl PeriodicPipeline {
    fn attach(self, builder: MeterProviderBuilder) -> MeterProviderBuilder {
        match self.exporter {
            ConfiguredPushExporter::Console(e) => {
                builder.with_reader(periodic(e, self.interval, self.timeout))
            }
            ConfiguredPushExporter::Otlp(e) => {
                builder.with_reader(periodic(e, self.interval, self.timeout))
            }
        }
    }
}

fn periodic<E: PushMetricExporter>(
    exporter: E,
    interval: Duration,
    timeout: Duration,
) -> PeriodicReader {
    PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(interval)
        .with_timeout(timeout)
        .build()
}

fn metric_pipeline(reader: &MetricReader, resource: &Resource) -> Result<MetricPipeline, ConfigErrors> {
    match reader {
        OneOf::Empty => Err(ConfigError::NoValidReader.into()),
        OneOf::Many(_) => Err(ConfigError::MultipleReaderTypes.into()),
        OneOf::One(MetricReaderKind::Periodic(periodic)) => {
            periodic_pipeline(periodic).map(MetricPipeline::Periodic)
        }
        OneOf::One(MetricReaderKind::Pull(pull)) => match &pull.exporter {
            OneOf::Empty => Err(ConfigError::NoValidExporter {
                signal: Signal::Metric,
            }
            .into()),
            OneOf::Many(_) => Err(ConfigError::MultipleExporters.into()),
            OneOf::One(PullMetricExporterKind::Prometheus(prometheus)) => {
                build_prometheus(prometheus, resource).map(MetricPipeline::Pull)
            }
        },
    }
}

fn periodic_pipeline(declared: &PeriodicMetricReader) -> Result<PeriodicPipeline, ConfigErrors> {
    let mut errors = ConfigErrors::new();
    let interval = errors.collect(
        declared
            .interval
            .map_or(Ok(DEFAULT_INTERVAL), |ms| millis("interval", ms)),
    );
    let timeout = errors.collect(
        declared
            .timeout
            .map_or(Ok(DEFAULT_TIMEOUT), |ms| millis("timeout", ms)),
    );
    errors.collect(require_runtime("periodic metric reader"));
    let exporter = errors.collect(push_exporter(&declared.exporter));

    match (exporter, interval, timeout) {
        (Some(exporter), Some(interval), Some(timeout)) if errors.is_empty() => {
            Ok(PeriodicPipeline {
                exporter,
                interval,
                timeout,
            })
        }
        _ => Err(errors),
    }
}

fn push_exporter(declared: &PushExporterConfig) -> Result<ConfiguredPushExporter, ConfigErrors> {
    match declared {
        OneOf::Empty => Err(ConfigError::NoValidExporter {
            signal: Signal::Metric,
        }
        .into()),
        OneOf::Many(_) => Err(ConfigError::MultipleExporters.into()),
        OneOf::One(PushMetricExporterKind::Console(_)) => Ok(ConfiguredPushExporter::Console(
            opentelemetry_stdout::MetricExporter::default(),
        )),
        OneOf::One(PushMetricExporterKind::Otlp(otlp)) => {
            let settings = OtlpSettings::resolve(&otlp.otlp)?;
            Ok(ConfiguredPushExporter::Otlp(otlp_metric_exporter(otlp, &settings)?))
        }
    }
}

fn temporality(preference: Option<TemporalityPreference>) -> Temporality {
    match preference {
        None | Some(TemporalityPreference::Cumulative) => Temporality::Cumulative,
        Some(TemporalityPreference::Delta) => Temporality::Delta,
        Some(TemporalityPreference::LowMemory) => Temporality::LowMemory,
    }
}

fn otlp_metric_exporter(
    declared: &OtlpMetric,
    settings: &OtlpSettings,
) -> Result<opentelemetry_otlp::MetricExporter, ConfigError> {
    if declared.default_histogram_aggregation
        == Some(DefaultHistogramAggregation::Base2ExponentialBucketHistogram)
    {
        tracing::warn!(
            "base2_exponential_bucket_histogram default aggregation is not supported per exporter; use a view instead"
        );
    }

    let builder = opentelemetry_otlp::MetricExporter::builder()
        .with_temporality(temporality(declared.temporality_preference));
    let exporter = match settings.transport() {
        Transport::Grpc => settings.configure_tonic(builder.with_tonic())?.build(),
        Transport::HttpProtobuf | Transport::HttpJson => settings
            .configure_http(builder.with_http(), "/v1/metrics")?
            .build(),
    };
    exporter.map_err(|e| ConfigError::exporter("otlp metric exporter", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use otelconf_schema::exporter::Otlp;
    use otelconf_schema::metric::{
        Prometheus, PullMetricReader, View, ViewSelector, ViewStream,
    };
    use otelconf_schema::Empty;

    fn periodic_reader(exporter: PushMetricExporterKind) -> MetricReader {
        OneOf::One(MetricReaderKind::Periodic(PeriodicMetricReader {
            exporter: OneOf::One(exporter),
            interval: Some(1000),
            timeout: Some(500),
        }))
    }

    fn provider(readers: Vec<MetricReader>, views: Vec<View>) -> MeterProviderConfig {
        MeterProviderConfig { readers, views }
    }

    async fn shutdown(handle: MeterProviderHandle) {
        let (provider, endpoints) = handle.into_parts();
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .unwrap()
            .ok();
        for endpoint in endpoints {
            endpoint.stop().await;
        }
    }

    #[test]
    fn test_absent_declaration_is_noop() {
        assert!(build_meter_provider(None, &Resource::default())
            .unwrap()
            .is_noop());
    }

    #[test]
    fn test_reader_structure_errors() {
        let config = provider(
            vec![
                OneOf::Empty,
                OneOf::Many(vec![
                    MetricReaderKind::Pull(PullMetricReader::default()),
                    MetricReaderKind::Periodic(PeriodicMetricReader::default()),
                ]),
                OneOf::One(MetricReaderKind::Pull(PullMetricReader::default())),
            ],
            Vec::new(),
        );
        let err = build_meter_provider(Some(&config), &Resource::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no valid metric reader\nmust not specify multiple metric reader type\nno valid metric exporter"
        );
    }

    #[test]
    fn test_periodic_reader_requires_runtime() {
        let config = provider(
            vec![periodic_reader(PushMetricExporterKind::Console(Empty {}))],
            Vec::new(),
        );
        let err = build_meter_provider(Some(&config), &Resource::default()).unwrap_err();
        assert!(matches!(
            err.errors().iter().next(),
            Some(ConfigError::MissingRuntime("periodic metric reader"))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_periodic_console_and_otlp_readers() {
        let mut otlp = OtlpMetric::from(Otlp::new("http/protobuf").with_endpoint("localhost:4318"));
        otlp.temporality_preference = Some(TemporalityPreference::Delta);
        let config = provider(
            vec![
                periodic_reader(PushMetricExporterKind::Console(Empty {})),
                periodic_reader(PushMetricExporterKind::Otlp(otlp)),
            ],
            Vec::new(),
        );
        let handle = build_meter_provider(Some(&config), &Resource::default())
            .unwrap()
            .into_inner();
        assert!(handle.scrape_endpoints().is_empty());
        shutdown(handle).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_compression_is_reported() {
        let otlp = OtlpMetric::from(Otlp::new("grpc").with_compression("invalid"));
        let config = provider(
            vec![periodic_reader(PushMetricExporterKind::Otlp(otlp))],
            Vec::new(),
        );
        let err = build_meter_provider(Some(&config), &Resource::default()).unwrap_err();
        assert_eq!(err.to_string(), "unsupported compression \"invalid\"");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_negative_interval() {
        let config = provider(
            vec![OneOf::One(MetricReaderKind::Periodic(PeriodicMetricReader {
                exporter: OneOf::One(PushMetricExporterKind::Console(Empty {})),
                interval: Some(-1),
                timeout: Some(-2),
            }))],
            Vec::new(),
        );
        let err = build_meter_provider(Some(&config), &Resource::default()).unwrap_err();
        assert_eq!(err.to_string(), "invalid interval -1\ninvalid timeout -2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pull_reader_starts_endpoint() {
        let reader = OneOf::One(MetricReaderKind::Pull(PullMetricReader {
            exporter: OneOf::One(PullMetricExporterKind::Prometheus(Prometheus {
                host: Some("127.0.0.1".into()),
                port: Some(0),
                ..Prometheus::default()
            })),
        }));
        let handle = build_meter_provider(Some(&provider(vec![reader], Vec::new())), &Resource::default())
            .unwrap()
            .into_inner();
        assert_eq!(handle.scrape_endpoints().len(), 1);
        shutdown(handle).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_view_is_reported_with_reader_errors() {
        let views = vec![View {
            selector: Some(ViewSelector {
                instrument_type: Some("invalid_type".into()),
                ..ViewSelector::default()
            }),
            stream: Some(ViewStream::default()),
        }];
        let config = provider(vec![OneOf::Empty], views);
        let err = build_meter_provider(Some(&config), &Resource::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no valid metric reader\nview_selector: instrument_type: invalid value \"invalid_type\""
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_prepared_builder_keeps_its_readers() {
        use opentelemetry::metrics::MeterProvider as _;
        use opentelemetry_sdk::testing::metrics::InMemoryMetricExporter;

        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone(), runtime::Tokio).build();
        let builder = SdkMeterProvider::builder().with_reader(reader);
        let config = provider(
            vec![periodic_reader(PushMetricExporterKind::Console(Empty {}))],
            Vec::new(),
        );
        let handle =
            build_meter_provider_with(Some(&config), &Resource::default(), builder).unwrap();

        handle
            .provider()
            .provider()
            .meter("test")
            .u64_counter("requests")
            .build()
            .add(1, &[]);
        let handle = handle.into_inner();
        let provider = handle.provider().clone();
        tokio::task::spawn_blocking(move || provider.force_flush())
            .await
            .unwrap()
            .unwrap();
        let metrics = exporter.get_finished_metrics().unwrap();
        assert!(metrics
            .iter()
            .flat_map(|m| &m.scope_metrics)
            .flat_map(|s| &s.metrics)
            .any(|m| m.name == "requests"));
        shutdown(handle).await;
    }

    #[test]
    fn test_temporality_mapping() {
        assert_eq!(temporality(None), Temporality::Cumulative);
        assert_eq!(
            temporality(Some(TemporalityPreference::Delta)),
            Temporality::Delta
        );
        assert_eq!(
            temporality(Some(TemporalityPreference::LowMemory)),
            Temporality::LowMemory
        );
    }
}
