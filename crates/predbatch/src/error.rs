//! Error types for the batcher.
//!
//! Errors fall in two scopes. [`IngressError`] concerns a single caller and
//! never reaches the batch. [`DispatchError`] concerns a whole batch: its text
//! is broadcast to every caller that shared the failed downstream call.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use crate::protocol::BatchResult;

/// Boxed error used at the downstream seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures confined to one inbound request.
#[derive(Debug, Error)]
pub enum IngressError {
    /// The request body could not be read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// The request body is not a valid predict payload.
    #[error("invalid predict payload: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The payload carried no instances.
    #[error("request contains no instances")]
    EmptyInstances,

    /// The result could not be encoded for this caller.
    #[error("failed to encode response: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The accumulator has stopped accepting submissions.
    #[error("batcher is shut down")]
    Closed,
}

impl IngressError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngressError::BodyRead(_)
            | IngressError::InvalidJson(_)
            | IngressError::EmptyInstances => StatusCode::BAD_REQUEST,
            IngressError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngressError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        (self.status(), Json(BatchResult::failure(self.to_string()))).into_response()
    }
}

/// Failures of the shared downstream call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The batch could not be encoded.
    #[error("failed to encode batch: {0}")]
    Encode(#[source] serde_json::Error),

    /// The downstream call did not complete.
    #[error("downstream call failed: {0}")]
    Transport(#[source] BoxError),

    /// The downstream answered with a non-success status.
    #[error("downstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The downstream answer is not a predict response.
    #[error("failed to decode downstream response: {0}")]
    Decode(#[source] serde_json::Error),

    /// Predictions are not aligned with the instances sent.
    #[error("downstream returned {actual} predictions for {expected} instances")]
    SizeMismatch { expected: usize, actual: usize },
}
