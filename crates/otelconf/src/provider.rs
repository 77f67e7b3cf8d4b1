//! Provider wrappers shared by the three signals.

use std::fmt;

use opentelemetry_sdk::logs::LoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{Sampler, TracerProvider};

use crate::error::{ConfigError, ConfigErrors};

/// Fails when no Tokio runtime is entered.
///
/// Batch processors, periodic readers, gRPC channels and scrape endpoints all
/// spawn onto the ambient runtime.
pub(crate) fn require_runtime(component: &'static str) -> Result<(), ConfigError> {
    tokio::runtime::Handle::try_current()
        .map(drop)
        .map_err(|_| ConfigError::MissingRuntime(component))
}

/// SDK provider types that have a pipeline-free fallback.
pub trait Noop: Sized + Send + 'static {
    /// Name used in logs and shutdown errors.
    const NAME: &'static str;

    /// A provider that records nothing.
    fn noop() -> Self;

    /// Shuts the provider down, flushing its pipelines.
    ///
    /// # Errors
    ///
    /// Returns the SDK's failure message.
    fn shutdown_provider(&self) -> Result<(), String>;
}

impl Noop for TracerProvider {
    const NAME: &'static str = "tracer provider";

    fn noop() -> Self {
        Self::builder().with_sampler(Sampler::AlwaysOff).build()
    }

    fn shutdown_provider(&self) -> Result<(), String> {
        self.shutdown().map_err(|e| e.to_string())
    }
}

impl Noop for SdkMeterProvider {
    const NAME: &'static str = "meter provider";

    fn noop() -> Self {
        Self::builder().build()
    }

    fn shutdown_provider(&self) -> Result<(), String> {
        self.shutdown().map_err(|e| e.to_string())
    }
}

impl Noop for LoggerProvider {
    const NAME: &'static str = "logger provider";

    fn noop() -> Self {
        Self::builder().build()
    }

    fn shutdown_provider(&self) -> Result<(), String> {
        self.shutdown().map_err(|e| e.to_string())
    }
}

/// A provider together with whether it carries any pipeline.
#[derive(Debug, Clone)]
pub struct SignalProvider<P> {
    provider: P,
    noop: bool,
}

impl<P: Noop> SignalProvider<P> {
    /// Wraps a provider built from a declaration.
    pub fn built(provider: P) -> Self {
        Self {
            provider,
            noop: false,
        }
    }

    /// The fallback provider.
    pub fn noop() -> Self {
        Self {
            provider: P::noop(),
            noop: true,
        }
    }

    /// Returns `true` for the fallback provider.
    pub fn is_noop(&self) -> bool {
        self.noop
    }

    /// The SDK provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Unwraps the SDK provider.
    pub fn into_inner(self) -> P {
        self.provider
    }
}

impl<P> SignalProvider<P> {
    /// Transforms the provider, keeping its no-op flag.
    pub(crate) fn map<Q>(self, f: impl FnOnce(P) -> Q) -> SignalProvider<Q> {
        SignalProvider {
            provider: f(self.provider),
            noop: self.noop,
        }
    }
}

/// A failed provider build: every error found, plus a no-op provider callers
/// can keep using.
pub struct BuildError<P> {
    noop: SignalProvider<P>,
    errors: ConfigErrors,
}

impl<P: Noop> BuildError<P> {
    pub(crate) fn new(errors: ConfigErrors) -> Self {
        Self {
            noop: SignalProvider::noop(),
            errors,
        }
    }

    /// The errors found while building.
    pub fn errors(&self) -> &ConfigErrors {
        &self.errors
    }

    /// Splits into the fallback provider and the errors.
    pub fn into_parts(self) -> (SignalProvider<P>, ConfigErrors) {
        (self.noop, self.errors)
    }

    /// Drops the errors and keeps the fallback provider.
    pub fn into_noop(self) -> SignalProvider<P> {
        self.noop
    }
}

impl<P> fmt::Debug for BuildError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildError")
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl<P> fmt::Display for BuildError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.errors.fmt(f)
    }
}

impl<P> std::error::Error for BuildError<P> {}

/// Result of a provider builder.
pub type BuildResult<P> = Result<SignalProvider<P>, BuildError<P>>;

/// Turns accumulated errors into a [`BuildResult`], shutting `provider` down
/// when it cannot be returned.
pub(crate) fn finish<P: Noop>(provider: P, errors: ConfigErrors) -> BuildResult<P> {
    if errors.is_empty() {
        tracing::debug!(provider = P::NAME, "built provider");
        return Ok(SignalProvider::built(provider));
    }
    discard(provider);
    Err(BuildError::new(errors))
}

/// Shuts down a provider nobody will use. Inside a runtime the shutdown runs
/// on the blocking pool and is not awaited.
pub(crate) fn discard<P: Noop>(provider: P) {
    let shutdown = move || {
        if let Err(reason) = provider.shutdown_provider() {
            tracing::debug!(provider = P::NAME, %reason, "discarded provider did not shut down cleanly");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => drop(handle.spawn_blocking(shutdown)),
        Err(_) => shutdown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span, Tracer, TracerProvider as _};

    #[test]
    fn test_runtime_is_required() {
        assert!(matches!(
            require_runtime("batch span processor"),
            Err(ConfigError::MissingRuntime("batch span processor"))
        ));
    }

    #[tokio::test]
    async fn test_runtime_is_found() {
        assert!(require_runtime("batch span processor").is_ok());
    }

    #[test]
    fn test_noop_tracer_does_not_record() {
        let provider = SignalProvider::<TracerProvider>::noop();
        assert!(provider.is_noop());
        let span = provider.provider().tracer("test").start("span");
        assert!(!span.is_recording());
    }

    #[test]
    fn test_finish_with_errors_returns_noop() {
        let err = finish(
            SdkMeterProvider::builder().build(),
            ConfigError::NoValidReader.into(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "no valid metric reader");
        assert!(err.into_noop().is_noop());
    }

    #[test]
    fn test_finish_without_errors() {
        let provider = finish(LoggerProvider::builder().build(), ConfigErrors::new()).unwrap();
        assert!(!provider.is_noop());
    }
}
