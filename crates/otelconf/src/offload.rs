//! Network exporters driven by a simple processor.
//!
//! A simple processor exports on the thread that ends the span or emits the
//! record, blocking it until the export completes. Hyper and tonic futures
//! need a Tokio context to make progress, and that thread may not be inside
//! one. [`OnRuntime`] enters the runtime the provider was built in around
//! every poll of the export.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use opentelemetry_sdk::logs::LogResult;
use opentelemetry_sdk::export::logs::{LogBatch, LogExporter};
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::Resource;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::error::ConfigError;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// An exporter whose exports run in the context of a captured runtime.
pub(crate) struct OnRuntime<E> {
    inner: E,
    handle: Handle,
}

impl<E> OnRuntime<E> {
    /// Binds `inner` to the ambient runtime.
    ///
    /// The caller blocks while the runtime drives the export, so a
    /// current-thread runtime would deadlock when the blocked thread is its
    /// only worker.
    pub(crate) fn current(inner: E, component: &'static str) -> Result<Self, ConfigError> {
        let handle =
            Handle::try_current().map_err(|_| ConfigError::MissingRuntime(component))?;
        if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(ConfigError::CurrentThreadRuntime(component));
        }
        Ok(Self { inner, handle })
    }
}

impl<E: fmt::Debug> fmt::Debug for OnRuntime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnRuntime")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<E: SpanExporter> SpanExporter for OnRuntime<E> {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<ExportResult> {
        let future = {
            let _entered = self.handle.enter();
            self.inner.export(batch)
        };
        Box::pin(Entered {
            handle: self.handle.clone(),
            future,
        })
    }

    fn shutdown(&mut self) {
        let _entered = self.handle.enter();
        self.inner.shutdown();
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

#[async_trait]
impl<E: LogExporter> LogExporter for OnRuntime<E> {
    async fn export(&mut self, batch: LogBatch<'_>) -> LogResult<()> {
        let future = {
            let _entered = self.handle.enter();
            self.inner.export(batch)
        };
        Entered {
            handle: self.handle.clone(),
            future,
        }
        .await
    }

    fn shutdown(&mut self) {
        let _entered = self.handle.enter();
        self.inner.shutdown();
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Polls `future` with `handle` entered.
struct Entered<F> {
    handle: Handle,
    future: F,
}

impl<F: Future + Unpin> Future for Entered<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        let _entered = this.handle.enter();
        Pin::new(&mut this.future).poll(cx)
    }
}
