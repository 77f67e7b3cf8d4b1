//! Exporter declarations shared across signals.

use serde::{Deserialize, Serialize};

use crate::one_of::Empty;

/// The console exporter takes no settings.
pub type Console = Empty;

/// A header name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameStringValuePair {
    /// Header name.
    pub name: String,

    /// Header value; `null` means an empty value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl NameStringValuePair {
    /// Creates a pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// OTLP exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Otlp {
    /// Transport: `http/protobuf`, `http/json`, `grpc/protobuf` or `grpc`.
    pub protocol: String,

    /// Collector endpoint. A missing scheme is read as `http://`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Path to a PEM CA bundle used to verify the collector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// Path to the PEM client private key for mTLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,

    /// Path to the PEM client certificate for mTLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,

    /// `gzip` or `none`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,

    /// Export timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,

    /// Structured headers; applied after `headers_list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<NameStringValuePair>>,

    /// Headers in `key=value,key2=value2` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_list: Option<String>,

    /// Disables TLS for gRPC connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
}

impl Otlp {
    /// Creates settings for the given protocol with everything else unset.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            endpoint: None,
            certificate: None,
            client_key: None,
            client_certificate: None,
            compression: None,
            timeout: None,
            headers: None,
            headers_list: None,
            insecure: None,
        }
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the compression.
    #[must_use]
    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }
}

/// Zipkin exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zipkin {
    /// Collector endpoint, e.g. `http://localhost:9411/api/v2/spans`.
    pub endpoint: String,

    /// Export timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
}

/// An include/exclude list of keys.
///
/// Excluded keys win over included ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeExclude {
    /// Keys to keep. Absent means every key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<String>>,

    /// Keys to drop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded: Option<Vec<String>>,
}
