//! OpenTracing `ot-tracer-*` header propagation.

use std::sync::OnceLock;

use opentelemetry::baggage::BaggageExt;
use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::{Context, KeyValue};

const TRACE_ID_HEADER: &str = "ot-tracer-traceid";
const SPAN_ID_HEADER: &str = "ot-tracer-spanid";
const SAMPLED_HEADER: &str = "ot-tracer-sampled";
const BAGGAGE_PREFIX: &str = "ot-baggage-";

static FIELDS: OnceLock<[String; 3]> = OnceLock::new();

/// Propagates span context and baggage in the OpenTracing header format.
///
/// Trace ids are sent as their low 64 bits; 64-bit ids are zero padded on
/// extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtTracePropagator;

impl OtTracePropagator {
    /// Creates the propagator.
    pub fn new() -> Self {
        Self
    }
}

impl TextMapPropagator for OtTracePropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let span = cx.span();
        let sc = span.span_context();
        if !sc.is_valid() {
            return;
        }

        let trace_id = format!("{:032x}", sc.trace_id());
        injector.set(TRACE_ID_HEADER, trace_id[16..].to_string());
        injector.set(SPAN_ID_HEADER, format!("{:016x}", sc.span_id()));
        injector.set(
            SAMPLED_HEADER,
            if sc.is_sampled() { "true" } else { "false" }.to_string(),
        );
        for (key, (value, _)) in cx.baggage() {
            injector.set(&format!("{BAGGAGE_PREFIX}{key}"), value.to_string());
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        let Some(sc) = extract_span_context(extractor) else {
            return cx.clone();
        };

        let baggage: Vec<KeyValue> = extractor
            .keys()
            .into_iter()
            .filter_map(|key| {
                let name = key.strip_prefix(BAGGAGE_PREFIX)?;
                let value = extractor.get(key)?;
                Some(KeyValue::new(name.to_string(), value.to_string()))
            })
            .collect();
        let cx = if baggage.is_empty() {
            cx.clone()
        } else {
            cx.with_baggage(baggage)
        };
        cx.with_remote_span_context(sc)
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(FIELDS.get_or_init(|| {
            [
                TRACE_ID_HEADER.to_string(),
                SPAN_ID_HEADER.to_string(),
                SAMPLED_HEADER.to_string(),
            ]
        }))
    }
}

fn extract_span_context(extractor: &dyn Extractor) -> Option<SpanContext> {
    let flags = match extractor
        .get(SAMPLED_HEADER)
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "1" | "true" => TraceFlags::SAMPLED,
        "0" | "false" | "" => TraceFlags::default(),
        _ => return None,
    };

    let trace_id = extractor.get(TRACE_ID_HEADER)?;
    let span_id = extractor.get(SPAN_ID_HEADER)?;
    let trace_id = match trace_id.len() {
        16 => TraceId::from_hex(&format!("{:0>32}", trace_id)).ok()?,
        32 => TraceId::from_hex(trace_id).ok()?,
        _ => return None,
    };
    if span_id.len() != 16 {
        return None;
    }
    let span_id = SpanId::from_hex(span_id).ok()?;

    let sc = SpanContext::new(trace_id, span_id, flags, true, TraceState::default());
    sc.is_valid().then_some(sc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn carrier(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn extracted(pairs: &[(&str, &str)]) -> SpanContext {
        OtTracePropagator::new()
            .extract(&carrier(pairs))
            .span()
            .span_context()
            .clone()
    }

    #[test]
    fn test_inject_uses_low_64_bits() {
        let sc = SpanContext::new(
            TraceId::from_hex("80f198ee56343ba864fe8b2a57d3eff7").unwrap(),
            SpanId::from_hex("e457b5a2e4d86bd1").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let cx = Context::new()
            .with_remote_span_context(sc)
            .with_baggage([KeyValue::new("user", "alice")]);
        let mut out = HashMap::new();
        OtTracePropagator::new().inject_context(&cx, &mut out);
        assert_eq!(out[TRACE_ID_HEADER], "64fe8b2a57d3eff7");
        assert_eq!(out[SPAN_ID_HEADER], "e457b5a2e4d86bd1");
        assert_eq!(out[SAMPLED_HEADER], "true");
        assert_eq!(out["ot-baggage-user"], "alice");
    }

    #[test]
    fn test_extract_pads_short_trace_id() {
        let sc = extracted(&[
            (TRACE_ID_HEADER, "64fe8b2a57d3eff7"),
            (SPAN_ID_HEADER, "e457b5a2e4d86bd1"),
            (SAMPLED_HEADER, "1"),
        ]);
        assert_eq!(
            sc.trace_id(),
            TraceId::from_hex("000000000000000064fe8b2a57d3eff7").unwrap()
        );
        assert!(sc.is_sampled());
        assert!(sc.is_remote());
    }

    #[test]
    fn test_extract_requires_both_ids() {
        assert!(!extracted(&[(TRACE_ID_HEADER, "64fe8b2a57d3eff7")]).is_valid());
        assert!(!extracted(&[(SPAN_ID_HEADER, "e457b5a2e4d86bd1")]).is_valid());
    }

    #[test]
    fn test_extract_rejects_bad_sampled_flag() {
        let sc = extracted(&[
            (TRACE_ID_HEADER, "64fe8b2a57d3eff7"),
            (SPAN_ID_HEADER, "e457b5a2e4d86bd1"),
            (SAMPLED_HEADER, "maybe"),
        ]);
        assert!(!sc.is_valid());
    }

    #[test]
    fn test_extract_baggage() {
        let cx = OtTracePropagator::new().extract(&carrier(&[
            (TRACE_ID_HEADER, "64fe8b2a57d3eff7"),
            (SPAN_ID_HEADER, "e457b5a2e4d86bd1"),
            ("ot-baggage-tenant", "acme"),
        ]));
        assert_eq!(
            cx.baggage().get("tenant").map(ToString::to_string),
            Some("acme".to_string())
        );
    }
}
