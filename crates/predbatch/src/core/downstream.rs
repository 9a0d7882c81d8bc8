use std::sync::{Mutex, PoisonError};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Service, ServiceExt};
use crate::error::BoxError;

/// The handler a batch is dispatched to.
///
/// The accumulator only ever sees this contract: hand over one request, get
/// one response back. Whether the call stays in-process or crosses the
/// network is up to the implementation.
///
/// # Example
///
/// ```ignore
/// use predbatch::{BoxError, Downstream};
/// use async_trait::async_trait;
///
/// struct AlwaysUnavailable;
///
/// #[async_trait]
/// impl Downstream for AlwaysUnavailable {
///     async fn call(&self, _request: Request<Body>) -> Result<Response<Body>, BoxError> {
///         Err("model server is down".into())
///     }
/// }
/// ```
#[async_trait]
pub trait Downstream: Send + Sync + 'static {
    /// Sends `request` and waits for the full response.
    async fn call(&self, request: Request<Body>) -> Result<Response<Body>, BoxError>;
}

/// Adapts any cloneable tower [`Service`] into a [`Downstream`].
///
/// This is how the wrapped handler of the middleware is reached: each batch
/// is driven through a fresh clone of the service. The service itself does
/// not need to be `Sync`.
pub struct ServiceDownstream<S> {
    inner: Mutex<S>,
}

impl<S> ServiceDownstream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner: Mutex::new(inner) }
    }
}

#[async_trait]
impl<S> Downstream for ServiceDownstream<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
{
    async fn call(&self, request: Request<Body>) -> Result<Response<Body>, BoxError> {
        let service = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        service.oneshot(request).await.map_err(Into::into)
    }
}
