//! Text map propagator registry.
//!
//! Names resolve to propagators in declaration order and are combined into a
//! single composite:
//!
//! | name           | propagator                                   |
//! |----------------|----------------------------------------------|
//! | `tracecontext` | W3C `traceparent`/`tracestate`               |
//! | `baggage`      | W3C `baggage`                                |
//! | `b3`           | B3 single header                             |
//! | `b3multi`      | B3 multiple headers                          |
//! | `jaeger`       | `uber-trace-id`                              |
//! | `xray`         | AWS `X-Amzn-Trace-Id`                        |
//! | `ottrace`      | OpenTracing `ot-tracer-*`                    |

mod ottrace;
mod xray;

use std::fmt;
use std::sync::Arc;

use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_zipkin::B3Encoding;
use otelconf_schema::Propagator;

use crate::error::{ConfigError, ConfigErrors};

pub use ottrace::OtTracePropagator;
pub use xray::XrayPropagator;

/// A propagator the registry knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagatorName {
    /// W3C trace context.
    TraceContext,
    /// W3C baggage.
    Baggage,
    /// B3 single header.
    B3,
    /// B3 multiple headers.
    B3Multi,
    /// Jaeger.
    Jaeger,
    /// AWS X-Ray.
    Xray,
    /// OpenTracing.
    OtTrace,
}

impl PropagatorName {
    /// Resolves a declared name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedPropagator`] for unknown names.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "tracecontext" => Ok(Self::TraceContext),
            "baggage" => Ok(Self::Baggage),
            "b3" => Ok(Self::B3),
            "b3multi" => Ok(Self::B3Multi),
            "jaeger" => Ok(Self::Jaeger),
            "xray" => Ok(Self::Xray),
            "ottrace" => Ok(Self::OtTrace),
            other => Err(ConfigError::UnsupportedPropagator(other.to_string())),
        }
    }

    /// The declared name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TraceContext => "tracecontext",
            Self::Baggage => "baggage",
            Self::B3 => "b3",
            Self::B3Multi => "b3multi",
            Self::Jaeger => "jaeger",
            Self::Xray => "xray",
            Self::OtTrace => "ottrace",
        }
    }

    fn build(self) -> Box<dyn TextMapPropagator + Send + Sync> {
        match self {
            Self::TraceContext => Box::new(TraceContextPropagator::new()),
            Self::Baggage => Box::new(BaggagePropagator::new()),
            Self::B3 => Box::new(opentelemetry_zipkin::Propagator::with_encoding(
                B3Encoding::SingleHeader,
            )),
            Self::B3Multi => Box::new(opentelemetry_zipkin::Propagator::with_encoding(
                B3Encoding::MultipleHeader,
            )),
            Self::Jaeger => Box::new(opentelemetry_jaeger_propagator::Propagator::new()),
            Self::Xray => Box::new(XrayPropagator::new()),
            Self::OtTrace => Box::new(OtTracePropagator::new()),
        }
    }
}

impl fmt::Display for PropagatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The composite of every resolved propagator.
///
/// Cheap to clone; clones share the same composite.
#[derive(Clone)]
pub struct ConfiguredPropagator {
    names: Vec<PropagatorName>,
    inner: Arc<TextMapCompositePropagator>,
}

impl ConfiguredPropagator {
    /// Builds the composite of `names`, in order.
    pub fn new(names: Vec<PropagatorName>) -> Self {
        let inner = TextMapCompositePropagator::new(names.iter().map(|n| n.build()).collect());
        Self {
            names,
            inner: Arc::new(inner),
        }
    }

    /// The propagators in the composite, in injection order.
    pub fn names(&self) -> &[PropagatorName] {
        &self.names
    }
}

impl Default for ConfiguredPropagator {
    /// `tracecontext` followed by `baggage`.
    fn default() -> Self {
        Self::new(vec![PropagatorName::TraceContext, PropagatorName::Baggage])
    }
}

impl fmt::Debug for ConfiguredPropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredPropagator")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl TextMapPropagator for ConfiguredPropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        self.inner.inject_context(cx, injector);
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.inner.extract_with_context(cx, extractor)
    }

    fn fields(&self) -> FieldIter<'_> {
        self.inner.fields()
    }
}

/// Resolves the declared propagators.
///
/// An absent declaration yields `tracecontext` and `baggage`. `null` and empty
/// entries are skipped. Unknown names are reported; the composite of the
/// known ones is returned alongside, so `errors` is empty on success.
pub fn build_propagator(declared: Option<&Propagator>) -> (ConfiguredPropagator, ConfigErrors) {
    let Some(names) = declared.and_then(|p| p.composite.as_ref()) else {
        return (ConfiguredPropagator::default(), ConfigErrors::new());
    };

    let mut errors = ConfigErrors::new();
    let resolved: Vec<PropagatorName> = names
        .iter()
        .flatten()
        .filter(|name| !name.is_empty())
        .filter_map(|name| errors.collect(PropagatorName::parse(name)))
        .collect();
    tracing::debug!(propagators = ?resolved, "built propagator");

    (ConfiguredPropagator::new(resolved), errors)
}
