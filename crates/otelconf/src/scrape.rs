//! Prometheus pull reader and its scrape endpoint.
//!
//! Each pull reader gets its own registry, served as `GET /metrics` on the
//! declared `host:port` until the owning SDK shuts down.

use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use opentelemetry::Key;
use opentelemetry_prometheus::{PrometheusExporter, ResourceSelector};
use opentelemetry_sdk::Resource;
use otelconf_schema::exporter::IncludeExclude;
use otelconf_schema::metric::Prometheus;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{ConfigError, ConfigErrors};
use crate::provider::require_runtime;
use crate::view::wildcard_match;

/// A prometheus reader ready to attach to a meter provider.
pub struct PrometheusReader {
    /// The reader.
    pub exporter: PrometheusExporter,
    /// The endpoint serving the reader's registry.
    pub endpoint: ScrapeEndpoint,
}

/// Builds a pull reader and starts serving it.
///
/// # Errors
///
/// Reports a missing or invalid host or port, a missing runtime and bind
/// failures.
pub fn build_prometheus(
    config: &Prometheus,
    resource: &Resource,
) -> Result<PrometheusReader, ConfigErrors> {
    let mut errors = ConfigErrors::new();
    if config.host.is_none() {
        errors.push(ConfigError::MissingHost);
    }
    let port = match config.port {
        None => {
            errors.push(ConfigError::MissingPort);
            None
        }
        Some(port) => errors.collect(u16::try_from(port).map_err(|_| ConfigError::InvalidPort(port))),
    };
    errors.collect(require_runtime("prometheus exporter"));
    let (Some(host), Some(port)) = (config.host.as_deref(), port) else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let registry = Registry::new();
    let mut builder = opentelemetry_prometheus::exporter().with_registry(registry.clone());
    if config.without_scope_info.unwrap_or(false) {
        builder = builder.without_scope_info();
    }
    if config.without_units.unwrap_or(false) {
        builder = builder.without_units();
    }
    if config.without_type_suffix.unwrap_or(false) {
        builder = builder.without_counter_suffixes();
    }
    if let Some(labels) = &config.with_resource_constant_labels {
        builder = builder.with_resource_selector(ResourceSelector::KeyAllowList(
            constant_label_keys(labels, resource),
        ));
    }
    let exporter = builder
        .build()
        .map_err(|e| ConfigError::exporter("prometheus exporter", e))?;

    let endpoint = ScrapeEndpoint::bind(host, port, registry)?;
    Ok(PrometheusReader { exporter, endpoint })
}

/// Resource keys exported as constant labels: keys matching an `included`
/// pattern (every key when unset) and no `excluded` pattern.
fn constant_label_keys(labels: &IncludeExclude, resource: &Resource) -> HashSet<Key> {
    let matches_any = |patterns: &Option<Vec<String>>, key: &str| {
        patterns
            .iter()
            .flatten()
            .any(|pattern| wildcard_match(pattern, key))
    };

    resource
        .iter()
        .map(|(key, _)| key)
        .filter(|key| labels.included.is_none() || matches_any(&labels.included, key.as_str()))
        .filter(|key| !matches_any(&labels.excluded, key.as_str()))
        .cloned()
        .collect()
}

/// A running scrape endpoint. Dropping it stops the server.
#[derive(Debug)]
pub struct ScrapeEndpoint {
    addr: SocketAddr,
    shutdown: ShutdownSignal,
    task: Option<JoinHandle<()>>,
}

impl ScrapeEndpoint {
    fn bind(host: &str, port: u16, registry: Registry) -> Result<Self, ConfigError> {
        let bind_error = |source| ConfigError::Bind {
            addr: format!("{host}:{port}"),
            source,
        };
        let listener = std::net::TcpListener::bind((host, port)).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let listener = TcpListener::from_std(listener).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(serve(listener, Arc::new(registry), shutdown.clone()));
        tracing::info!(%addr, "prometheus endpoint listening");

        Ok(Self {
            addr,
            shutdown,
            task: Some(task),
        })
    }

    /// The bound address, useful when port `0` was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting scrapes and waits for the server task to finish.
    pub async fn stop(mut self) {
        self.shutdown.trigger();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(addr = %self.addr, "prometheus endpoint task failed: {e}");
            }
        }
        tracing::info!(addr = %self.addr, "prometheus endpoint stopped");
    }
}

impl Drop for ScrapeEndpoint {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

async fn serve(listener: TcpListener, registry: Arc<Registry>, shutdown: ShutdownSignal) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        let registry = Arc::clone(&registry);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, registry, shutdown).await {
                                tracing::debug!(%remote_addr, "scrape connection error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("failed to accept scrape connection: {e}");
                    }
                }
            }

            () = shutdown.recv() => break,
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    registry: Arc<Registry>,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let registry = Arc::clone(&registry);
        async move { Ok::<_, Infallible>(handle(&req, &registry)) }
    });
    let conn = http1::Builder::new().serve_connection(io, service);

    tokio::select! {
        result = conn => result,
        () = shutdown.recv() => Ok(()),
    }
}

fn handle(req: &Request<Incoming>, registry: &Registry) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return status(StatusCode::NOT_FOUND, "not found\n");
    }

    let mut body = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut body) {
        tracing::warn!("failed to encode metrics: {e}");
        return status(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics\n");
    }

    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
    response
}

fn status(code: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = code;
    response
}

/// Stops a scrape endpoint and every connection it accepted.
#[derive(Debug, Clone)]
struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine.
            let _ = self.sender.send(());
        }
    }

    async fn recv(&self) {
        let mut receiver = self.sender.subscribe();
        if self.triggered.load(Ordering::SeqCst) {
            return;
        }
        let _ = receiver.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    fn config(host: Option<&str>, port: Option<i64>) -> Prometheus {
        Prometheus {
            host: host.map(str::to_string),
            port,
            ..Prometheus::default()
        }
    }

    #[test]
    fn test_host_and_port_are_required() {
        let errors = build_prometheus(&config(None, None), &Resource::empty())
            .err()
            .unwrap();
        let messages = errors.to_string();
        assert!(messages.contains("host must be specified"));
        assert!(messages.contains("port must be specified"));
    }

    #[tokio::test]
    async fn test_port_out_of_range() {
        let errors = build_prometheus(&config(Some("localhost"), Some(70000)), &Resource::empty())
            .err()
            .unwrap();
        assert_eq!(errors.to_string(), "invalid port 70000");
    }

    #[test]
    fn test_runtime_is_required() {
        let errors = build_prometheus(&config(Some("localhost"), Some(0)), &Resource::empty())
            .err()
            .unwrap();
        assert!(matches!(
            errors.iter().next(),
            Some(ConfigError::MissingRuntime(_))
        ));
    }

    #[test]
    fn test_constant_label_selection() {
        let resource = Resource::new([
            KeyValue::new("service.name", "checkout"),
            KeyValue::new("service.attr1", "x"),
            KeyValue::new("host.name", "node-1"),
        ]);
        let labels = IncludeExclude {
            included: Some(vec!["service*".into()]),
            excluded: Some(vec!["service.attr1".into()]),
        };
        let keys = constant_label_keys(&labels, &resource);
        assert_eq!(keys, HashSet::from([Key::new("service.name")]));

        let everything_but_host = IncludeExclude {
            included: None,
            excluded: Some(vec!["host.*".into()]),
        };
        assert_eq!(constant_label_keys(&everything_but_host, &resource).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scrape_endpoint_serves_metrics() {
        let reader = build_prometheus(&config(Some("127.0.0.1"), Some(0)), &Resource::empty())
            .unwrap();
        let addr = reader.endpoint.local_addr();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.exporter)
            .build();
        provider
            .meter("test")
            .u64_counter("requests")
            .build()
            .add(3, &[]);

        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("requests_total"));

        let missing = reqwest::get(format!("http://{addr}/other")).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        reader.endpoint.stop().await;
        assert!(reqwest::get(format!("http://{addr}/metrics")).await.is_err());
        provider.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_address_in_use() {
        let first = build_prometheus(&config(Some("127.0.0.1"), Some(0)), &Resource::empty())
            .unwrap();
        let port = i64::from(first.endpoint.local_addr().port());
        let errors = build_prometheus(&config(Some("127.0.0.1"), Some(port)), &Resource::empty())
            .err()
            .unwrap();
        assert!(matches!(errors.iter().next(), Some(ConfigError::Bind { .. })));
    }
}
