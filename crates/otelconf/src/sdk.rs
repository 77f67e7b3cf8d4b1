//! The SDK facade: every provider and the propagator built from one document.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use opentelemetry::global;
use opentelemetry_sdk::logs::{self, LoggerProvider};
use opentelemetry_sdk::metrics::{MeterProviderBuilder, SdkMeterProvider};
use opentelemetry_sdk::trace::{self, TracerProvider};
use opentelemetry_sdk::Resource;
use otelconf_schema::{ConfigLoader, Configuration};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ConfigErrors, SdkError, SdkResult, ShutdownError, ShutdownErrors};
use crate::log::build_logger_provider_with;
use crate::metric::build_meter_provider_with;
use crate::scrape::ScrapeEndpoint;
use crate::propagation::{build_propagator, ConfiguredPropagator};
use crate::provider::{discard, BuildResult, Noop, SignalProvider};
use crate::resource::build_resource;
use crate::trace::build_tracer_provider_with;

/// Environment variable naming the configuration file read by
/// [`Sdk::from_env`].
pub const CONFIG_FILE_ENV: &str = "OTEL_EXPERIMENTAL_CONFIG_FILE";

const DEFAULT_FILE_FORMAT: &str = "0.3";

type Customize<B> = Box<dyn FnOnce(B) -> B + Send>;

/// Builder for [`Sdk`].
#[derive(Default)]
pub struct SdkBuilder {
    configuration: Option<Configuration>,
    default_resource: Option<Resource>,
    tracer_provider_options: Option<Customize<trace::Builder>>,
    meter_provider_options: Option<Customize<MeterProviderBuilder>>,
    logger_provider_options: Option<Customize<logs::Builder>>,
}

impl fmt::Debug for SdkBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkBuilder")
            .field("configuration", &self.configuration)
            .field("default_resource", &self.default_resource)
            .field("tracer_provider_options", &self.tracer_provider_options.is_some())
            .field("meter_provider_options", &self.meter_provider_options.is_some())
            .field("logger_provider_options", &self.logger_provider_options.is_some())
            .finish()
    }
}

/// Runs `next` after whatever was already registered.
fn chain<B: 'static>(
    current: Option<Customize<B>>,
    next: impl FnOnce(B) -> B + Send + 'static,
) -> Option<Customize<B>> {
    Some(match current {
        Some(current) => Box::new(move |builder| next(current(builder))),
        None => Box::new(next),
    })
}

fn prepared<B>(fresh: B, options: Option<Customize<B>>) -> B {
    match options {
        Some(options) => options(fresh),
        None => fresh,
    }
}

impl SdkBuilder {
    /// Creates a builder with no document; building it yields no-op providers
    /// and the default propagator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the document to build from.
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Sets the resource the declared one is merged over. Defaults to the
    /// SDK's process resource.
    pub fn default_resource(mut self, resource: Resource) -> Self {
        self.default_resource = Some(resource);
        self
    }

    /// Adjusts the tracer provider builder before the declared pipelines are
    /// added, for settings a document cannot express such as an ID
    /// generator or an in-process span processor.
    ///
    /// The declared resource, sampler and limits take precedence over the
    /// same settings made here. Ignored when no tracer provider is declared.
    /// Repeated calls run in order.
    pub fn with_tracer_provider_options(
        mut self,
        options: impl FnOnce(trace::Builder) -> trace::Builder + Send + 'static,
    ) -> Self {
        self.tracer_provider_options = chain(self.tracer_provider_options.take(), options);
        self
    }

    /// Adjusts the meter provider builder before the declared readers and
    /// views are added. Ignored when no meter provider is declared.
    pub fn with_meter_provider_options(
        mut self,
        options: impl FnOnce(MeterProviderBuilder) -> MeterProviderBuilder + Send + 'static,
    ) -> Self {
        self.meter_provider_options = chain(self.meter_provider_options.take(), options);
        self
    }

    /// Adjusts the logger provider builder before the declared processors are
    /// added. Ignored when no logger provider is declared.
    pub fn with_logger_provider_options(
        mut self,
        options: impl FnOnce(logs::Builder) -> logs::Builder + Send + 'static,
    ) -> Self {
        self.logger_provider_options = chain(self.logger_provider_options.take(), options);
        self
    }

    /// Builds every provider and the propagator.
    ///
    /// A disabled document yields no-op providers without building anything.
    /// Otherwise all errors of the resource, the three providers and the
    /// propagator are collected; if there are any, whatever was built is shut
    /// down and the errors are returned together.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`] with every error found.
    pub fn build(self) -> SdkResult<Sdk> {
        let configuration = self
            .configuration
            .unwrap_or_else(|| Configuration::new(DEFAULT_FILE_FORMAT));
        let default_resource = self.default_resource.unwrap_or_default();

        if configuration.is_disabled() {
            tracing::debug!("sdk disabled; using no-op providers");
            return Ok(Sdk::noop(default_resource));
        }

        let mut errors = ConfigErrors::new();
        let resource = errors
            .collect(build_resource(configuration.resource.as_ref(), &default_resource))
            .unwrap_or(default_resource);
        let limits = configuration.attribute_limits.as_ref();

        let tracer_provider = collect_provider(
            &mut errors,
            build_tracer_provider_with(
                configuration.tracer_provider.as_ref(),
                &resource,
                limits,
                prepared(TracerProvider::builder(), self.tracer_provider_options),
            ),
        );
        let mut scrape_endpoints = Vec::new();
        let meter_provider = collect_provider(
            &mut errors,
            build_meter_provider_with(
                configuration.meter_provider.as_ref(),
                &resource,
                prepared(SdkMeterProvider::builder(), self.meter_provider_options),
            ),
        )
        .map(|handle| {
            let (provider, endpoints) = handle.into_parts();
            scrape_endpoints = endpoints;
            provider
        });
        let logger_provider = collect_provider(
            &mut errors,
            build_logger_provider_with(
                configuration.logger_provider.as_ref(),
                &resource,
                limits,
                prepared(LoggerProvider::builder(), self.logger_provider_options),
            ),
        );
        let (propagator, propagator_errors) = build_propagator(configuration.propagator.as_ref());
        errors.append(propagator_errors);

        let sdk = Sdk {
            tracer_provider,
            meter_provider,
            scrape_endpoints,
            logger_provider,
            propagator,
            resource,
        };
        if errors.is_empty() {
            tracing::debug!("sdk built");
            return Ok(sdk);
        }
        sdk.discard();
        Err(SdkError::Config(errors))
    }
}

fn collect_provider<P: Noop>(errors: &mut ConfigErrors, result: BuildResult<P>) -> SignalProvider<P> {
    result.unwrap_or_else(|err| {
        let (noop, provider_errors) = err.into_parts();
        errors.append(provider_errors);
        noop
    })
}

/// Tracer, meter and logger providers plus the propagator of one document.
///
/// Dropping the facade without [`Sdk::shutdown`] leaves flushing to the SDK
/// providers' own drop behaviour.
#[derive(Debug)]
pub struct Sdk {
    tracer_provider: SignalProvider<TracerProvider>,
    meter_provider: SignalProvider<SdkMeterProvider>,
    scrape_endpoints: Vec<ScrapeEndpoint>,
    logger_provider: SignalProvider<LoggerProvider>,
    propagator: ConfiguredPropagator,
    resource: Resource,
}

impl Sdk {
    /// Starts building a facade.
    pub fn builder() -> SdkBuilder {
        SdkBuilder::new()
    }

    /// Loads the document at `path` and builds it.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Decode`] when the file cannot be loaded and
    /// [`SdkError::Config`] when it describes invalid pipelines.
    pub fn from_file(path: impl AsRef<Path>) -> SdkResult<Self> {
        let configuration = ConfigLoader::new().with_file(path)?.load()?;
        Self::builder().configuration(configuration).build()
    }

    /// Builds from the file named by `OTEL_EXPERIMENTAL_CONFIG_FILE`, or
    /// returns `None` when the variable is unset or empty.
    ///
    /// # Errors
    ///
    /// Same as [`Sdk::from_file`].
    pub fn from_env() -> SdkResult<Option<Self>> {
        match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path).map(Some),
            _ => Ok(None),
        }
    }

    fn noop(resource: Resource) -> Self {
        Self {
            tracer_provider: SignalProvider::noop(),
            meter_provider: SignalProvider::noop(),
            scrape_endpoints: Vec::new(),
            logger_provider: SignalProvider::noop(),
            propagator: ConfiguredPropagator::default(),
            resource,
        }
    }

    /// The tracer provider.
    pub fn tracer_provider(&self) -> &SignalProvider<TracerProvider> {
        &self.tracer_provider
    }

    /// The meter provider.
    pub fn meter_provider(&self) -> &SignalProvider<SdkMeterProvider> {
        &self.meter_provider
    }

    /// The logger provider.
    pub fn logger_provider(&self) -> &SignalProvider<LoggerProvider> {
        &self.logger_provider
    }

    /// The composite propagator.
    pub fn propagator(&self) -> &ConfiguredPropagator {
        &self.propagator
    }

    /// The resource shared by every provider.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Endpoints serving the prometheus readers.
    pub fn scrape_endpoints(&self) -> &[ScrapeEndpoint] {
        &self.scrape_endpoints
    }

    /// Registers the tracer provider, meter provider and propagator with
    /// [`opentelemetry::global`].
    ///
    /// The logger provider has no global registry; bridge it explicitly.
    pub fn install_global(&self) {
        global::set_tracer_provider(self.tracer_provider.provider().clone());
        global::set_meter_provider(self.meter_provider.provider().clone());
        global::set_text_map_propagator(self.propagator.clone());
        tracing::debug!("installed global providers");
    }

    /// Shuts every provider down and stops the scrape endpoints, waiting as
    /// long as they take.
    ///
    /// # Errors
    ///
    /// Returns every provider failure, joined.
    pub async fn shutdown(self) -> Result<(), ShutdownErrors> {
        self.shutdown_until(None).await
    }

    /// Like [`Sdk::shutdown`], but gives up after `timeout`.
    ///
    /// Providers still running at the deadline each contribute a
    /// [`ShutdownError::DeadlineExceeded`], joined with the failures already
    /// collected.
    ///
    /// # Errors
    ///
    /// Returns every provider failure and missed deadline, joined.
    pub async fn shutdown_with_timeout(self, timeout: Duration) -> Result<(), ShutdownErrors> {
        self.shutdown_until(Some(Instant::now() + timeout)).await
    }

    async fn shutdown_until(self, deadline: Option<Instant>) -> Result<(), ShutdownErrors> {
        let pending = [
            spawn_shutdown(self.tracer_provider.into_inner()),
            spawn_shutdown(self.meter_provider.into_inner()),
            spawn_shutdown(self.logger_provider.into_inner()),
        ];

        let mut errors = Vec::new();
        for (component, task) in pending {
            match until(deadline, task).await {
                None => errors.push(ShutdownError::DeadlineExceeded(component)),
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(reason))) => errors.push(ShutdownError::Provider { component, reason }),
                Some(Err(join_error)) => errors.push(ShutdownError::Provider {
                    component,
                    reason: join_error.to_string(),
                }),
            }
        }
        for endpoint in self.scrape_endpoints {
            if until(deadline, endpoint.stop()).await.is_none() {
                errors.push(ShutdownError::DeadlineExceeded("prometheus endpoint"));
            }
        }

        if errors.is_empty() {
            tracing::debug!("sdk shut down");
            Ok(())
        } else {
            Err(ShutdownErrors(errors))
        }
    }

    fn discard(self) {
        discard(self.tracer_provider.into_inner());
        discard(self.meter_provider.into_inner());
        discard(self.logger_provider.into_inner());
    }
}

fn spawn_shutdown<P: Noop>(provider: P) -> (&'static str, JoinHandle<Result<(), String>>) {
    (
        P::NAME,
        tokio::task::spawn_blocking(move || provider.shutdown_provider()),
    )
}

async fn until<F: std::future::Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::propagation::TextMapPropagator;
    use otelconf_schema::trace::{SimpleSpanProcessor, SpanExporterKind, SpanProcessorKind};
    use otelconf_schema::{Empty, OneOf, Propagator};

    fn console_tracing() -> Configuration {
        let mut configuration = Configuration::new("0.3");
        configuration.tracer_provider = Some(otelconf_schema::trace::TracerProvider {
            processors: vec![OneOf::One(SpanProcessorKind::Simple(SimpleSpanProcessor {
                exporter: OneOf::One(SpanExporterKind::Console(Empty {})),
            }))],
            ..Default::default()
        });
        configuration
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_builder_is_noop() {
        let sdk = Sdk::builder().build().unwrap();
        assert!(sdk.tracer_provider().is_noop());
        assert!(sdk.meter_provider().is_noop());
        assert!(sdk.logger_provider().is_noop());
        assert_eq!(sdk.propagator().fields().count(), 3);
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disabled_skips_construction() {
        let mut configuration = console_tracing();
        configuration.disabled = Some(true);
        configuration.propagator = Some(Propagator::composite(["invalid"]));
        let sdk = Sdk::builder().configuration(configuration).build().unwrap();
        assert!(sdk.tracer_provider().is_noop());
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_declared_tracer_provider() {
        let sdk = Sdk::builder()
            .configuration(console_tracing())
            .build()
            .unwrap();
        assert!(!sdk.tracer_provider().is_noop());
        assert!(sdk.meter_provider().is_noop());
        sdk.shutdown_with_timeout(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_errors_from_every_component_are_joined() {
        let mut configuration = console_tracing();
        configuration.meter_provider = Some(otelconf_schema::metric::MeterProvider {
            readers: vec![OneOf::Empty],
            views: Vec::new(),
        });
        configuration.propagator = Some(Propagator::composite(["nope"]));
        let Err(SdkError::Config(errors)) = Sdk::builder().configuration(configuration).build() else {
            panic!("expected configuration errors");
        };
        assert_eq!(
            errors.to_string(),
            "no valid metric reader\nunsupported propagator \"nope\""
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_options_run_before_declared_pipelines() {
        use opentelemetry::trace::{Span as _, Tracer as _, TracerProvider as _};
        use opentelemetry::KeyValue;
        use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let exporter = InMemorySpanExporter::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let (first, second) = (Arc::clone(&calls), Arc::clone(&calls));
        let hooked = exporter.clone();

        let mut configuration = console_tracing();
        configuration.resource = Some(otelconf_schema::Resource {
            attributes_list: Some("service.name=declared".into()),
            ..Default::default()
        });
        let sdk = Sdk::builder()
            .configuration(configuration)
            .with_tracer_provider_options(move |builder| {
                assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
                builder.with_resource(Resource::new([KeyValue::new("service.name", "option")]))
            })
            .with_tracer_provider_options(move |builder| {
                assert_eq!(second.fetch_add(1, Ordering::SeqCst), 1);
                builder.with_simple_exporter(hooked)
            })
            .with_meter_provider_options(|_| panic!("no meter provider is declared"))
            .build()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(sdk.meter_provider().is_noop());

        sdk.tracer_provider().provider().tracer("test").start("hooked").end();
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0]
                .resource
                .get(opentelemetry::Key::new("service.name"))
                .map(|v| v.to_string()),
            Some("declared".to_string())
        );
        sdk.shutdown().await.unwrap();
    }

    #[test]
    fn test_from_env_without_variable() {
        std::env::remove_var(CONFIG_FILE_ENV);
        assert!(Sdk::from_env().unwrap().is_none());
    }
}
