//! AWS X-Ray `X-Amzn-Trace-Id` propagation.
//!
//! ```text
//! X-Amzn-Trace-Id: Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1
//! ```

use std::sync::OnceLock;

use opentelemetry::baggage::BaggageExt;
use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::{Context, KeyValue};

const HEADER: &str = "X-Amzn-Trace-Id";
const MAX_HEADER_LEN: usize = 256;
const ROOT: &str = "Root";
const PARENT: &str = "Parent";
const SAMPLED: &str = "Sampled";
const LINEAGE: &str = "Lineage";
const VERSION: &str = "1";
const TRACE_ID_LEN: usize = 35;

static FIELDS: OnceLock<[String; 1]> = OnceLock::new();

/// Propagates span context in the AWS X-Ray header format.
#[derive(Debug, Clone, Copy, Default)]
pub struct XrayPropagator;

impl XrayPropagator {
    /// Creates the propagator.
    pub fn new() -> Self {
        Self
    }
}

impl TextMapPropagator for XrayPropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let span = cx.span();
        let sc = span.span_context();
        if !sc.is_valid() {
            return;
        }

        let trace_id = format!("{:032x}", sc.trace_id());
        let sampled = if sc.is_sampled() { "1" } else { "0" };
        let mut header = format!(
            "{ROOT}={VERSION}-{}-{};{PARENT}={:016x};{SAMPLED}={sampled}",
            &trace_id[..8],
            &trace_id[8..],
            sc.span_id(),
        );
        if let Some(lineage) = cx.baggage().get(LINEAGE) {
            header.push_str(&format!(";{LINEAGE}={lineage}"));
        }
        header.truncate(MAX_HEADER_LEN);
        injector.set(HEADER, header);
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        let Some(header) = extractor.get(HEADER).filter(|h| !h.is_empty()) else {
            return cx.clone();
        };
        match parse_header(header) {
            Some(parsed) if parsed.span_context.is_valid() => {
                let cx = match parsed.lineage {
                    Some(lineage) => cx.with_baggage([KeyValue::new(LINEAGE, lineage)]),
                    None => cx.clone(),
                };
                cx.with_remote_span_context(parsed.span_context)
            }
            _ => cx.clone(),
        }
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(FIELDS.get_or_init(|| [HEADER.to_lowercase()]))
    }
}

struct ParsedHeader {
    span_context: SpanContext,
    lineage: Option<String>,
}

fn parse_header(header: &str) -> Option<ParsedHeader> {
    let mut trace_id = TraceId::INVALID;
    let mut span_id = SpanId::INVALID;
    let mut flags = TraceFlags::default();
    let mut lineage = None;

    for part in header.split(';').map(str::trim) {
        let (key, value) = part.split_once('=')?;
        if key.starts_with(ROOT) {
            trace_id = parse_trace_id(value)?;
        } else if key.starts_with(PARENT) {
            if value.len() != 16 {
                return None;
            }
            span_id = SpanId::from_hex(value).ok()?;
        } else if key.starts_with(SAMPLED) {
            flags = if value.len() == 1 && value != "1" {
                TraceFlags::default()
            } else {
                TraceFlags::SAMPLED
            };
        } else if key.starts_with(LINEAGE) && valid_lineage(value) {
            lineage = Some(value.to_string());
        }
    }

    Some(ParsedHeader {
        span_context: SpanContext::new(trace_id, span_id, flags, true, TraceState::default()),
        lineage,
    })
}

/// `1-{8 hex epoch}-{24 hex unique}` to a 128-bit trace id.
fn parse_trace_id(value: &str) -> Option<TraceId> {
    if value.len() != TRACE_ID_LEN || !value.is_ascii() {
        return None;
    }
    let mut parts = value.splitn(3, '-');
    let (Some(VERSION), Some(epoch), Some(unique)) = (parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    if epoch.len() != 8 {
        return None;
    }
    TraceId::from_hex(&format!("{epoch}{unique}")).ok()
}

/// `{loop counter}:{8 hex hash}:{request counter}`.
fn valid_lineage(value: &str) -> bool {
    if !(12..=18).contains(&value.len()) {
        return false;
    }
    let parts: Vec<&str> = value.split(':').collect();
    let [loops, hash, requests] = parts.as_slice() else {
        return false;
    };
    let hash_ok = hash.len() == 8 && u32::from_str_radix(hash, 16).is_ok();
    let loops_ok = loops.parse::<u16>().is_ok_and(|n| n <= 32767);
    let requests_ok = requests.parse::<u8>().is_ok();
    hash_ok && loops_ok && requests_ok
}
