use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::Span;
use crate::config::BatcherConfig;
use crate::error::BoxError;
use super::service::BatcherService;

/// Layer that applies [`BatcherService`] to a wrapped service.
///
/// Every application of the layer starts its own accumulator, so two
/// services produced by the same layer never batch together. Use
/// [`BatcherService::handle`] on the produced service to stop it.
#[derive(Clone)]
pub struct BatcherLayer {
    config: BatcherConfig,
    span: Span,
}

impl BatcherLayer {
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config,
            span: tracing::info_span!("batcher"),
        }
    }

    /// Records the batcher's log events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl<S> Layer<S> for BatcherLayer
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
{
    type Service = BatcherService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BatcherService::new(self.config.clone(), inner, self.span.clone())
    }
}
