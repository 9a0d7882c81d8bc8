//! Ingress: the tower service that feeds predict requests into a batch.

use std::sync::Arc;
use std::task::{Context, Poll};
use axum::body::{to_bytes, Body};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tower::Service;
use tracing::{debug, info_span, Instrument, Span};
use crate::communication::Submission;
use crate::config::BatcherConfig;
use crate::core::accumulator;
use crate::core::downstream::ServiceDownstream;
use crate::core::worker::WorkerHandle;
use crate::error::{BoxError, IngressError};
use crate::protocol::{is_predict_path, BatchResult, PredictRequest};

/// Batches requests to `*:predict` paths in front of `S`.
///
/// Every other request is passed to `S` untouched. A predict request is
/// decoded, handed to this service's accumulator, and answered with the
/// caller's share of the batch once it has been dispatched to `S`.
///
/// Clones share one accumulator; each call to [`BatcherService::new`]
/// starts a new one. The accumulator keeps batching until it is stopped
/// through a [`BatcherHandle`] or until every clone and every in-flight
/// predict request is gone, whichever comes first.
pub struct BatcherService<S> {
    inner: S,
    sender: mpsc::Sender<Submission>,
    worker: Arc<WorkerHandle>,
    max_body_bytes: usize,
    span: Span,
}

impl<S> Clone for BatcherService<S>
where S: Clone
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sender: self.sender.clone(),
            worker: self.worker.clone(),
            max_body_bytes: self.max_body_bytes,
            span: self.span.clone(),
        }
    }
}

impl<S> BatcherService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
{
    /// Wraps `inner` and starts the accumulator that batches for it.
    ///
    /// The accumulator can receive as soon as this returns. Its log events are
    /// recorded inside `span`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: BatcherConfig, inner: S, span: Span) -> Self {
        let max_body_bytes = config.max_body_bytes;
        let downstream = Arc::new(ServiceDownstream::new(inner.clone()));
        let (sender, worker) = accumulator::spawn(config, downstream, span.clone());

        Self {
            inner,
            sender,
            worker: Arc::new(worker),
            max_body_bytes,
            span,
        }
    }
}

impl<S> BatcherService<S> {
    /// Returns a handle for stopping this service's accumulator.
    pub fn handle(&self) -> BatcherHandle {
        BatcherHandle { worker: self.worker.clone() }
    }
}

impl<S> Service<Request<Body>> for BatcherService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if !is_predict_path(request.uri().path()) {
            // `self.inner` is the clone that was driven to readiness.
            let clone = self.inner.clone();
            let mut inner = std::mem::replace(&mut self.inner, clone);
            return Box::pin(async move { inner.call(request).await });
        }

        let ingress = Ingress {
            sender: self.sender.clone(),
            max_body_bytes: self.max_body_bytes,
        };
        let span = info_span!(parent: &self.span, "predict", path = %request.uri().path());
        Box::pin(async move { Ok(ingress.handle(request).await) }.instrument(span))
    }
}

/// What a single predict call needs from its service.
struct Ingress {
    sender: mpsc::Sender<Submission>,
    max_body_bytes: usize,
}

impl Ingress {
    async fn handle(self, request: Request<Body>) -> Response<Body> {
        let outcome = match self.submit(request).await {
            Ok(result) => encode(&result),
            Err(err) => Err(err),
        };

        outcome.unwrap_or_else(|err| {
            debug!(target: "predbatch::ingress", error = %err, "predict request rejected");
            err.into_response()
        })
    }

    async fn submit(&self, request: Request<Body>) -> Result<BatchResult, IngressError> {
        let path = request.uri().path().to_owned();
        let body = to_bytes(request.into_body(), self.max_body_bytes)
            .await
            .map_err(|e| IngressError::BodyRead(e.to_string()))?;
        let payload: PredictRequest =
            serde_json::from_slice(&body).map_err(IngressError::InvalidJson)?;
        if payload.instances.is_empty() {
            return Err(IngressError::EmptyInstances);
        }

        let (submission, ticket) = Submission::new(payload.instances, path);
        self.sender
            .send(submission)
            .await
            .map_err(|_| IngressError::Closed)?;
        ticket.await.map_err(|_| IngressError::Closed)
    }
}

/// Serializes a batch outcome for the caller.
///
/// Batch failures are ordinary results: they go out with `200 OK` and a
/// non-empty `message`.
fn encode(result: &BatchResult) -> Result<Response<Body>, IngressError> {
    let body = serde_json::to_vec(result).map_err(IngressError::Serialization)?;
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

/// Controls the lifetime of a batcher's accumulator.
///
/// Stopping flushes any partially filled batch before the accumulator exits;
/// predict requests that arrive afterwards are answered with
/// `503 Service Unavailable`.
#[derive(Clone)]
pub struct BatcherHandle {
    worker: Arc<WorkerHandle>,
}

impl BatcherHandle {
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Signals the accumulator to drain and stop, without waiting.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }

    /// Signals the accumulator to drain and stop, and waits until it has.
    pub async fn shutdown_and_wait(&self) {
        self.worker.shutdown();
        self.worker.wait().await;
    }
}
