//! # Predbatch
//!
//! Dynamic request batching for inference backends that serve one request at
//! a time.
//!
//! ## Overview
//!
//! Predbatch sits in front of a model server as HTTP middleware. Concurrent
//! callers posting `{"instances": [...]}` to a `*:predict` path are merged into
//! a single downstream call; the positionally aligned predictions are then
//! split back so each caller receives exactly its own share. Throughput of the
//! backend goes up at the cost of a bounded amount of added latency.
//!
//! ## Architecture
//!
//! ### Ingress
//!
//! [`BatcherService`] is a tower service wrapping the model server's handler.
//! Requests to other paths pass straight through. Predict requests are decoded,
//! handed off to the accumulator, and answered once their batch completes.
//!
//! ### Accumulator
//!
//! One background task per batcher owns all batch state. It appends incoming
//! instances, records which index range belongs to which caller, and flushes
//! when a batch reaches `max_batch_size` instances or has been open for
//! `max_latency`. Flushes run one at a time, so a batcher never has more than
//! one downstream call in flight.
//!
//! ### Dispatch and fan-out
//!
//! A flush POSTs the concatenated instances to the batch's path through the
//! [`Downstream`] contract. Failures of that shared call, including
//! predictions that do not line up with the instances, are broadcast to every
//! caller in the batch as a result with a non-empty `message`.
//!
//! ## Example
//!
//! ```ignore
//! use predbatch::{BatcherConfig, BatcherService};
//! use axum::Router;
//!
//! let model_server = Router::new().fallback(model_handler);
//! let batcher = BatcherService::new(
//!     BatcherConfig::new(32, 50),
//!     model_server,
//!     tracing::info_span!("batcher"),
//! );
//! let handle = batcher.handle();
//! let app = Router::new().fallback_service(batcher);
//!
//! axum::serve(listener, app).await?;
//! handle.shutdown_and_wait().await;
//! ```
//!

mod communication;
mod config;
mod core;
mod error;
mod forwarder;
mod middleware;
mod protocol;

pub use crate::config::{
    BatcherConfig,
    DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_MAX_BODY_BYTES,
    DEFAULT_MAX_LATENCY_MS,
    DEFAULT_POLL_INTERVAL,
};
pub use crate::core::downstream::{Downstream, ServiceDownstream};
pub use crate::error::{BoxError, DispatchError, IngressError};
pub use crate::forwarder::HttpForwarder;
pub use crate::middleware::{BatcherHandle, BatcherLayer, BatcherService};
pub use crate::protocol::{
    is_predict_path,
    BatchResult,
    PredictRequest,
    PredictResponse,
    PREDICT_SUFFIX,
};
