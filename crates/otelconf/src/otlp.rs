//! OTLP exporter settings shared by every signal.

use std::collections::HashMap;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Uri;
use opentelemetry_otlp::{
    Compression, Protocol, WithExportConfig, WithHttpConfig, WithTonicConfig,
};
use otelconf_schema::exporter::Otlp;
use tonic::metadata::MetadataMap;

use crate::error::{ConfigError, ConfigErrors};
use crate::headers::resolve_headers;
use crate::provider::require_runtime;
use crate::tls::TlsMaterial;

/// Transport selected by the `protocol` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `grpc`, also spelled `grpc/protobuf`.
    Grpc,
    /// `http/protobuf`.
    HttpProtobuf,
    /// `http/json`.
    HttpJson,
}

impl Transport {
    /// Parses a `protocol` value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedProtocol`] for any other value.
    pub fn parse(protocol: &str) -> Result<Self, ConfigError> {
        match protocol {
            "grpc" | "grpc/protobuf" => Ok(Self::Grpc),
            "http/protobuf" => Ok(Self::HttpProtobuf),
            "http/json" => Ok(Self::HttpJson),
            other => Err(ConfigError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// A validated OTLP exporter declaration.
#[derive(Debug, Clone)]
pub struct OtlpSettings {
    transport: Transport,
    endpoint: Option<Uri>,
    compression: Option<Compression>,
    timeout: Option<Duration>,
    headers: HashMap<String, String>,
    tls: Option<TlsMaterial>,
    insecure: bool,
}

impl OtlpSettings {
    /// Validates every field of `config`, reporting all mistakes together.
    ///
    /// # Errors
    ///
    /// Returns the protocol, endpoint, compression, timeout, header and TLS
    /// errors found.
    pub fn resolve(config: &Otlp) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();

        let transport = errors.collect(Transport::parse(&config.protocol));
        let endpoint = errors.collect(
            config
                .endpoint
                .as_deref()
                .filter(|e| !e.is_empty())
                .map(parse_endpoint)
                .transpose(),
        );
        let compression = errors.collect(parse_compression(config.compression.as_deref()));
        let timeout = errors.collect(
            config
                .timeout
                .map(|ms| millis("timeout", ms))
                .transpose(),
        );
        let headers = errors
            .collect(resolve_headers(
                config.headers.as_deref(),
                config.headers_list.as_deref(),
            ))
            .and_then(|headers| errors.collect(check_header_names(headers)));
        let tls = errors.collect(TlsMaterial::load(
            config.certificate.as_deref(),
            config.client_certificate.as_deref(),
            config.client_key.as_deref(),
        ));

        match (transport, endpoint, compression, timeout, headers, tls) {
            (
                Some(transport),
                Some(endpoint),
                Some(compression),
                Some(timeout),
                Some(headers),
                Some(tls),
            ) if errors.is_empty() => Ok(Self {
                transport,
                endpoint,
                compression,
                timeout,
                headers,
                tls,
                insecure: config.insecure.unwrap_or(false),
            }),
            _ => Err(errors),
        }
    }

    /// The selected transport.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// The normalized endpoint, if one was declared.
    pub fn endpoint(&self) -> Option<&Uri> {
        self.endpoint.as_ref()
    }

    /// Header map sent with every export.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Whether gRPC exports are encrypted.
    ///
    /// TLS is used for `https` endpoints unless `insecure` is set.
    pub fn uses_tls(&self) -> bool {
        !self.insecure
            && self
                .endpoint
                .as_ref()
                .and_then(Uri::scheme_str)
                .is_some_and(|scheme| scheme == "https")
    }

    /// Full request URL for HTTP exports.
    ///
    /// An endpoint without a path (or with `/`) gets `default_path`, e.g.
    /// `/v1/traces`.
    pub fn http_url(&self, default_path: &str) -> Option<String> {
        let endpoint = self.endpoint.as_ref()?;
        let scheme = endpoint.scheme_str().unwrap_or("http");
        let authority = endpoint.authority().map_or("", |a| a.as_str());
        let path = match endpoint.path() {
            "" | "/" => default_path,
            path => path,
        };
        Some(format!("{scheme}://{authority}{path}"))
    }

    /// Applies the settings to a gRPC exporter builder.
    ///
    /// # Errors
    ///
    /// Fails outside a Tokio runtime or when a header cannot be sent as
    /// metadata.
    pub fn configure_tonic<B>(&self, builder: B) -> Result<B, ConfigError>
    where
        B: WithExportConfig + WithTonicConfig,
    {
        require_runtime("otlp grpc exporter")?;

        let mut builder = builder.with_protocol(Protocol::Grpc);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint.to_string());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.with_timeout(timeout);
        }
        if let Some(compression) = self.compression {
            builder = builder.with_compression(compression);
        }
        if !self.headers.is_empty() {
            builder = builder.with_metadata(self.metadata()?);
        }
        if self.uses_tls() {
            let domain = self.endpoint.as_ref().and_then(Uri::host);
            let tls = self.tls.clone().unwrap_or_default();
            builder = builder.with_tls_config(tls.tonic_config(domain));
        } else if self.tls.is_some() {
            tracing::warn!("ignoring TLS files for a plaintext gRPC endpoint");
        }

        Ok(builder)
    }

    /// Applies the settings to an HTTP exporter builder.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn configure_http<B>(&self, builder: B, default_path: &str) -> Result<B, ConfigError>
    where
        B: WithExportConfig + WithHttpConfig,
    {
        let protocol = match self.transport {
            Transport::HttpJson => Protocol::HttpJson,
            _ => Protocol::HttpBinary,
        };
        let mut builder = builder.with_protocol(protocol);
        if let Some(url) = self.http_url(default_path) {
            builder = builder.with_endpoint(url);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.with_timeout(timeout);
        }
        if self.compression.is_some() {
            tracing::warn!("gzip compression is not available for OTLP over HTTP; sending uncompressed");
        }
        if !self.headers.is_empty() {
            builder = builder.with_headers(self.headers.clone());
        }

        Ok(builder.with_http_client(self.http_client()?))
    }

    /// Async HTTP client carrying the TLS material and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Exporter`] when the client cannot be built.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        match &self.tls {
            Some(tls) if !self.insecure => tls.http_client(self.timeout),
            _ => TlsMaterial::default().http_client(self.timeout),
        }
    }

    fn metadata(&self) -> Result<MetadataMap, ConfigError> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeaderName(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::exporter("otlp grpc metadata", e))?;
            headers.insert(name, value);
        }
        Ok(MetadataMap::from_headers(headers))
    }
}

/// Prefixes `http://` when the endpoint has no scheme and parses it.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEndpoint`] when the result is not a URI.
pub fn parse_endpoint(endpoint: &str) -> Result<Uri, ConfigError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };
    normalized
        .parse::<Uri>()
        .map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: normalized.clone(),
            reason: e.to_string(),
        })
}

fn parse_compression(compression: Option<&str>) -> Result<Option<Compression>, ConfigError> {
    match compression {
        None | Some("none") => Ok(None),
        Some("gzip") => Ok(Some(Compression::Gzip)),
        Some(other) => Err(ConfigError::UnsupportedCompression(other.to_string())),
    }
}

fn check_header_names(
    headers: HashMap<String, String>,
) -> Result<HashMap<String, String>, ConfigError> {
    if let Some(name) = headers
        .keys()
        .find(|name| HeaderName::from_bytes(name.as_bytes()).is_err())
    {
        return Err(ConfigError::InvalidHeaderName(name.clone()));
    }
    Ok(headers)
}

/// Converts a non-negative millisecond count.
pub(crate) fn millis(parameter: &'static str, value: i64) -> Result<Duration, ConfigError> {
    u64::try_from(value)
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::tuning(parameter, value))
}
