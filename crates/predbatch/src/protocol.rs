//! Wire types for the predict protocol.
//!
//! Callers and the downstream model server speak the same envelope:
//! `{"instances": [...]}` in, `{"predictions": [...]}` out, with predictions
//! positionally aligned to the instances sent. The batcher answers each caller
//! with a [`BatchResult`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Path suffix of requests eligible for batching.
pub const PREDICT_SUFFIX: &str = ":predict";

/// Returns `true` if requests to `path` should be batched.
///
/// Equivalent to matching `.*:predict$`.
pub fn is_predict_path(path: &str) -> bool {
    path.ends_with(PREDICT_SUFFIX)
}

/// Body of an inbound predict request, and of the batched downstream call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub instances: Vec<Value>,
}

/// Body the downstream model server answers a predict call with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: Vec<Value>,
}

/// What every caller of the batcher receives.
///
/// On success `message` is empty, `batch_id` identifies the downstream call
/// the caller's instances rode in, and `predictions` holds exactly the
/// caller's slice of the batch output. On failure only `message` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub batch_id: String,
    #[serde(default)]
    pub predictions: Vec<Value>,
}

impl BatchResult {
    pub fn success(batch_id: Uuid, predictions: Vec<Value>) -> Self {
        Self {
            message: String::new(),
            batch_id: batch_id.to_string(),
            predictions,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.message.is_empty()
    }
}
