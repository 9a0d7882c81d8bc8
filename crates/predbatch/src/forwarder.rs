//! Reverse proxy to a model server reachable over HTTP.

use std::convert::Infallible;
use std::task::{Context, Poll};
use axum::body::{to_bytes, Body};
use axum::http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{Request, Response, StatusCode, Uri};
use futures::future::BoxFuture;
use tower::Service;
use tracing::warn;
use crate::error::BoxError;

/// Forwards every request to the same path under a base URL.
///
/// As a tower service it never fails: a request the upstream could not be
/// reached for is answered with `502 Bad Gateway`, which a batch then reports
/// as a downstream status failure.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpForwarder {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(1000)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    /// Upstream URL for a request to `uri`.
    pub fn target(&self, uri: &Uri) -> String {
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        format!("{}{}", self.base_url, path)
    }

    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, BoxError> {
        let (mut parts, body) = request.into_parts();
        let body = to_bytes(body, usize::MAX).await?;
        parts.headers.remove(HOST);
        parts.headers.remove(CONTENT_LENGTH);

        let upstream = self
            .client
            .request(parts.method, self.target(&parts.uri))
            .headers(parts.headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONTENT_LENGTH);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl Service<Request<Body>> for HttpForwarder {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let forwarder = self.clone();
        Box::pin(async move {
            let target = forwarder.target(request.uri());
            let response = forwarder.forward(request).await.unwrap_or_else(|err| {
                warn!(target: "predbatch::forwarder", upstream = %target, error = %err, "upstream request failed");
                let mut response = Response::new(Body::from(err.to_string()));
                *response.status_mut() = StatusCode::BAD_GATEWAY;
                response
            });
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    #[test]
    fn test_target_keeps_path_and_query() {
        let forwarder = HttpForwarder::new("http://127.0.0.1:8080/").unwrap();
        let uri: Uri = "/v1/models/m:predict?verbose=1".parse().unwrap();
        assert_eq!(forwarder.target(&uri), "http://127.0.0.1:8080/v1/models/m:predict?verbose=1");

        let uri: Uri = "http://example.com".parse().unwrap();
        assert_eq!(forwarder.target(&uri), "http://127.0.0.1:8080/");
    }

    #[tokio::test]
    async fn test_forwards_to_upstream() {
        let upstream = Router::new().route(
            "/echo",
            post(|body: String| async move { (StatusCode::CREATED, format!("got {body}")) }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, upstream).await.unwrap() });

        let forwarder = HttpForwarder::new(format!("http://{addr}")).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/echo")
            .body(Body::from("ping"))
            .unwrap();
        let response = forwarder.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"got ping");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = HttpForwarder::new(format!("http://{addr}")).unwrap();
        let request = Request::builder().uri("/anything").body(Body::empty()).unwrap();
        let response = forwarder.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
