//! Sampler trees.

use opentelemetry::trace::{
    Link, SamplingResult, SpanKind, TraceContextExt, TraceId,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{Sampler as SdkSampler, ShouldSample};
use otelconf_schema::trace::{ParentBasedSampler, Sampler, SamplerKind};

use crate::error::ConfigError;

/// A sampler built from a declaration.
#[derive(Debug, Clone)]
pub enum ConfiguredSampler {
    /// One of the SDK's samplers.
    Sdk(SdkSampler),
    /// Parent-based sampling with all five delegates configurable.
    ParentBased(Box<ParentBased>),
}

impl Default for ConfiguredSampler {
    /// `parent_based` with an `always_on` root.
    fn default() -> Self {
        Self::ParentBased(Box::new(ParentBased::new(Self::Sdk(SdkSampler::AlwaysOn))))
    }
}

impl ShouldSample for ConfiguredSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        match self {
            Self::Sdk(sampler) => {
                sampler.should_sample(parent_context, trace_id, name, span_kind, attributes, links)
            }
            Self::ParentBased(sampler) => {
                sampler.should_sample(parent_context, trace_id, name, span_kind, attributes, links)
            }
        }
    }
}

/// Picks a delegate by whether the parent is absent, remote or local, and
/// whether it was sampled.
#[derive(Debug, Clone)]
pub struct ParentBased {
    root: ConfiguredSampler,
    remote_parent_sampled: ConfiguredSampler,
    remote_parent_not_sampled: ConfiguredSampler,
    local_parent_sampled: ConfiguredSampler,
    local_parent_not_sampled: ConfiguredSampler,
}

impl ParentBased {
    /// Follows the parent's decision and uses `root` for new traces.
    pub fn new(root: ConfiguredSampler) -> Self {
        Self {
            root,
            remote_parent_sampled: ConfiguredSampler::Sdk(SdkSampler::AlwaysOn),
            remote_parent_not_sampled: ConfiguredSampler::Sdk(SdkSampler::AlwaysOff),
            local_parent_sampled: ConfiguredSampler::Sdk(SdkSampler::AlwaysOn),
            local_parent_not_sampled: ConfiguredSampler::Sdk(SdkSampler::AlwaysOff),
        }
    }

    fn delegate(&self, parent_context: Option<&Context>) -> &ConfiguredSampler {
        let Some(parent) = parent_context.filter(|cx| cx.has_active_span()) else {
            return &self.root;
        };
        let span = parent.span();
        let parent = span.span_context();
        match (parent.is_remote(), parent.is_sampled()) {
            (true, true) => &self.remote_parent_sampled,
            (true, false) => &self.remote_parent_not_sampled,
            (false, true) => &self.local_parent_sampled,
            (false, false) => &self.local_parent_not_sampled,
        }
    }
}

impl ShouldSample for ParentBased {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        self.delegate(parent_context)
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links)
    }
}

/// Builds the sampler tree. `None` yields the default sampler.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSampler`] for a sampler that selects no
/// alternative or several, and for `jaeger_remote`.
pub fn build_sampler(declared: Option<&Sampler>) -> Result<ConfiguredSampler, ConfigError> {
    match declared {
        None => Ok(ConfiguredSampler::default()),
        Some(sampler) => sampler_from(sampler),
    }
}

fn sampler_from(declared: &Sampler) -> Result<ConfiguredSampler, ConfigError> {
    let Some(kind) = declared.as_one() else {
        return Err(ConfigError::InvalidSampler);
    };

    match kind {
        SamplerKind::AlwaysOn(_) => Ok(ConfiguredSampler::Sdk(SdkSampler::AlwaysOn)),
        SamplerKind::AlwaysOff(_) => Ok(ConfiguredSampler::Sdk(SdkSampler::AlwaysOff)),
        SamplerKind::TraceIdRatioBased(ratio) => Ok(ConfiguredSampler::Sdk(
            SdkSampler::TraceIdRatioBased(ratio.ratio.unwrap_or(1.0)),
        )),
        SamplerKind::ParentBased(parent) => parent_based(parent),
        SamplerKind::JaegerRemote(_) => {
            tracing::warn!("jaeger_remote sampler is not supported");
            Err(ConfigError::InvalidSampler)
        }
    }
}

fn parent_based(declared: &ParentBasedSampler) -> Result<ConfiguredSampler, ConfigError> {
    let slot = |declared: Option<&Sampler>, fallback: ConfiguredSampler| {
        declared.map_or(Ok(fallback), sampler_from)
    };

    let defaults = ParentBased::new(ConfiguredSampler::Sdk(SdkSampler::AlwaysOn));
    Ok(ConfiguredSampler::ParentBased(Box::new(ParentBased {
        root: slot(declared.root.as_deref(), defaults.root)?,
        remote_parent_sampled: slot(
            declared.remote_parent_sampled.as_deref(),
            defaults.remote_parent_sampled,
        )?,
        remote_parent_not_sampled: slot(
            declared.remote_parent_not_sampled.as_deref(),
            defaults.remote_parent_not_sampled,
        )?,
        local_parent_sampled: slot(
            declared.local_parent_sampled.as_deref(),
            defaults.local_parent_sampled,
        )?,
        local_parent_not_sampled: slot(
            declared.local_parent_not_sampled.as_deref(),
            defaults.local_parent_not_sampled,
        )?,
    })))
}
