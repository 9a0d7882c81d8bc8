//! End-to-end tests of the batcher in front of an in-process model server.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use futures::future::join_all;
use serde_json::{json, Value};
use tower::limit::ConcurrencyLimit;
use tower::{Service, ServiceExt}; // for ready/oneshot

use predbatch::{BatchResult, BatcherConfig, BatcherLayer, BatcherService};

/// What the fake model server observed.
#[derive(Clone, Default)]
struct ModelServer {
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

impl ModelServer {
    fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Self::default() }
    }

    fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

/// Echoes instances back as predictions; anything that is not a predict
/// call gets a recognizable plain-text answer.
async fn echo_model(State(server): State<ModelServer>, request: Request) -> Response {
    let path = request.uri().path().to_owned();
    if !path.ends_with(":predict") {
        return (StatusCode::IM_A_TEAPOT, [("x-model", "raw")], format!("raw {path}")).into_response();
    }

    let current = server.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    server.peak.fetch_max(current, Ordering::SeqCst);

    let bytes = to_bytes(request.into_body(), usize::MAX).await.unwrap();
    let payload: Value = serde_json::from_slice(&bytes).unwrap();
    let instances = payload["instances"].as_array().cloned().unwrap_or_default();
    server.calls.lock().unwrap().push((path, instances.clone()));

    if !server.delay.is_zero() {
        tokio::time::sleep(server.delay).await;
    }
    server.in_flight.fetch_sub(1, Ordering::SeqCst);

    Json(json!({"predictions": instances})).into_response()
}

async fn failing_model(State(server): State<ModelServer>, request: Request) -> Response {
    server.calls.lock().unwrap().push((request.uri().path().to_owned(), vec![]));
    (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response()
}

async fn short_model(State(server): State<ModelServer>, request: Request) -> Response {
    server.calls.lock().unwrap().push((request.uri().path().to_owned(), vec![]));
    Json(json!({"predictions": [1]})).into_response()
}

fn batcher(config: BatcherConfig, server: &ModelServer) -> BatcherService<Router> {
    let model = Router::new().fallback(echo_model).with_state(server.clone());
    BatcherService::new(config, model, tracing::info_span!("test"))
}

fn predict(path: &str, instances: Value) -> Request {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(json!({"instances": instances}).to_string()))
        .unwrap()
}

async fn send(service: BatcherService<Router>, request: Request) -> (StatusCode, BatchResult) {
    let response = service.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

const PATH: &str = "/v1/models/m:predict";

/// Test: size trigger
///
/// Five concurrent single-instance callers with `max_batch_size = 5` share
/// exactly one downstream call and each gets its own prediction back.
#[tokio::test]
async fn test_size_trigger_batches_concurrent_callers() {
    let server = ModelServer::default();
    let service = batcher(BatcherConfig::new(5, 60_000), &server);

    let results = join_all(
        (0..5).map(|i| send(service.clone(), predict(PATH, json!([i])))),
    )
    .await;

    let calls = server.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, PATH);
    assert_eq!(calls[0].1.len(), 5);

    let batch_id = results[0].1.batch_id.clone();
    assert!(!batch_id.is_empty());
    for (i, (status, result)) in results.iter().enumerate() {
        assert_eq!(*status, StatusCode::OK);
        assert!(result.is_success());
        assert_eq!(result.predictions, vec![json!(i)]);
        assert_eq!(result.batch_id, batch_id);
    }
}

/// Test: latency trigger
///
/// A lone request is flushed once `max_latency` has elapsed.
#[tokio::test]
async fn test_latency_trigger_flushes_lone_request() {
    let server = ModelServer::default();
    let service = batcher(BatcherConfig::new(32, 50), &server);

    let started = Instant::now();
    let (status, result) = send(service, predict(PATH, json!([[1.0, 2.0]]))).await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result.predictions, vec![json!([1.0, 2.0])]);
    assert!(elapsed >= Duration::from_millis(45), "flushed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "flushed too late: {elapsed:?}");
    assert_eq!(server.calls().len(), 1);
}

/// Test: callers keep batching after every service clone is gone
///
/// `oneshot` consumes each clone right after `call`; the accumulator must
/// keep honoring both triggers while those callers wait.
#[tokio::test]
async fn test_batching_survives_dropped_services() {
    let server = ModelServer::default();
    let service = batcher(BatcherConfig::new(3, 50), &server);
    let (first, second) = (service.clone(), service.clone());
    drop(service);

    let started = Instant::now();
    let (a, b) = tokio::join!(
        send(first, predict(PATH, json!(["a"]))),
        send(second, predict(PATH, json!(["b"]))),
    );
    let elapsed = started.elapsed();

    assert_eq!(a.1.predictions, vec![json!("a")]);
    assert_eq!(b.1.predictions, vec![json!("b")]);
    assert_eq!(a.1.batch_id, b.1.batch_id);
    assert!(elapsed >= Duration::from_millis(45), "flushed too early: {elapsed:?}");

    let calls = server.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.len(), 2);
}

/// Test: callers with several instances get back exactly their ranges
#[tokio::test]
async fn test_multi_instance_callers_receive_their_slices() {
    let server = ModelServer::default();
    let service = batcher(BatcherConfig::new(6, 60_000), &server);

    let payloads = [json!(["a"]), json!(["b", "c"]), json!(["d", "e", "f"])];
    let results = join_all(
        payloads.iter().map(|p| send(service.clone(), predict(PATH, p.clone()))),
    )
    .await;

    let calls = server.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.len(), 6);

    for (payload, (_, result)) in payloads.iter().zip(results.iter()) {
        assert_eq!(&Value::Array(result.predictions.clone()), payload);
    }
}

/// Test: a failed downstream call reaches every co-batched caller
#[tokio::test]
async fn test_downstream_failure_reaches_every_caller() {
    let server = ModelServer::default();
    let model = Router::new().fallback(failing_model).with_state(server.clone());
    let service = BatcherService::new(BatcherConfig::new(10, 60_000), model, tracing::Span::none());

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        join_all((0..10).map(|i| send(service.clone(), predict(PATH, json!([i]))))),
    )
    .await
    .expect("callers must not hang on a failed batch");

    assert_eq!(server.calls().len(), 1);
    for (status, result) in results {
        assert_eq!(status, StatusCode::OK);
        assert!(result.message.contains("model crashed"), "message: {}", result.message);
        assert!(result.predictions.is_empty());
        assert!(result.batch_id.is_empty());
    }
}

/// Test: predictions that do not line up with the instances fail the batch
#[tokio::test]
async fn test_misaligned_predictions_fail_the_batch() {
    let server = ModelServer::default();
    let model = Router::new().fallback(short_model).with_state(server.clone());
    let service = BatcherService::new(BatcherConfig::new(3, 60_000), model, tracing::Span::none());

    let results = join_all((0..3).map(|i| send(service.clone(), predict(PATH, json!([i]))))).await;

    for (_, result) in results {
        assert_eq!(result.message, "downstream returned 1 predictions for 3 instances");
        assert!(result.predictions.is_empty());
    }
}

/// Test: only one downstream call is in flight at a time
#[tokio::test]
async fn test_single_downstream_call_in_flight() {
    let server = ModelServer::with_delay(Duration::from_millis(20));
    let service = batcher(BatcherConfig::new(2, 10), &server);

    let results = join_all((0..12).map(|i| send(service.clone(), predict(PATH, json!([i]))))).await;

    assert!(results.iter().all(|(_, r)| r.is_success()));
    assert_eq!(server.peak.load(Ordering::SeqCst), 1);

    let observed: usize = server.calls().iter().map(|(_, instances)| instances.len()).sum();
    assert_eq!(observed, 12);
}

/// Test: non-predict requests pass through untouched
#[tokio::test]
async fn test_non_predict_requests_pass_through() {
    let server = ModelServer::default();
    let service = batcher(BatcherConfig::new(5, 60_000), &server);

    let request = Request::builder()
        .uri("/v1/models/m")
        .body(Body::empty())
        .unwrap();
    let response = service.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(response.headers()["x-model"], "raw");
    let body = to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"raw /v1/models/m");
    assert!(server.calls().is_empty());
}

/// Test: pass-through uses the readiness reserved in `poll_ready`
#[tokio::test]
async fn test_pass_through_respects_inner_readiness() {
    let server = ModelServer::default();
    let model = ConcurrencyLimit::new(
        Router::new().fallback(echo_model).with_state(server.clone()),
        1,
    );
    let mut service = BatcherService::new(BatcherConfig::new(5, 60_000), model, tracing::Span::none());

    for _ in 0..3 {
        let request = Request::builder()
            .uri("/v1/models/m")
            .body(Body::empty())
            .unwrap();
        let response = service.ready().await.unwrap().call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    let request = Request::builder()
        .uri("/v1/models/m")
        .body(Body::empty())
        .unwrap();
    let response = service.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert!(server.calls().is_empty());
}

/// Test: malformed predict bodies are rejected before batching
#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let server = ModelServer::default();
    let service = batcher(BatcherConfig::new(1, 60_000), &server);

    let not_json = Request::builder()
        .method("POST")
        .uri(PATH)
        .body(Body::from("{not json"))
        .unwrap();
    let (status, result) = send(service.clone(), not_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!result.message.is_empty());

    let (status, result) = send(service.clone(), predict(PATH, json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(result.message, "request contains no instances");

    assert!(server.calls().is_empty());
}

/// Test: requests for different paths are never merged
#[tokio::test]
async fn test_paths_are_batched_separately() {
    let server = ModelServer::default();
    let service = batcher(BatcherConfig::new(2, 50), &server);

    let (a, b) = tokio::join!(
        send(service.clone(), predict("/v1/models/a:predict", json!(["a"]))),
        send(service.clone(), predict("/v1/models/b:predict", json!(["b"]))),
    );
    assert_eq!(a.1.predictions, vec![json!("a")]);
    assert_eq!(b.1.predictions, vec![json!("b")]);

    let mut calls = server.calls();
    calls.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], ("/v1/models/a:predict".to_owned(), vec![json!("a")]));
    assert_eq!(calls[1], ("/v1/models/b:predict".to_owned(), vec![json!("b")]));
}

/// Test: shutdown drains the open batch and then refuses new work
#[tokio::test]
async fn test_shutdown_drains_then_refuses() {
    let server = ModelServer::default();
    let service = batcher(BatcherConfig::new(32, 60_000), &server);
    let handle = service.handle();

    let pending = tokio::spawn(send(service.clone(), predict(PATH, json!([7]))));
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.shutdown_and_wait().await;
    assert!(!handle.is_running());

    let (status, result) = pending.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result.predictions, vec![json!(7)]);

    let (status, result) = send(service, predict(PATH, json!([8]))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(result.message, "batcher is shut down");
}

/// Test: the layer wires the batcher into a router
#[tokio::test]
async fn test_layer_batches_router_traffic() {
    let server = ModelServer::default();
    let app = Router::new()
        .fallback(echo_model)
        .with_state(server.clone())
        .layer(BatcherLayer::new(BatcherConfig::new(2, 60_000)));

    let responses = join_all((0..2).map(|i| app.clone().oneshot(predict(PATH, json!([i]))))).await;

    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let result: BatchResult = serde_json::from_slice(&body).unwrap();
        assert!(result.is_success());
    }
    assert_eq!(server.calls().len(), 1);
}
