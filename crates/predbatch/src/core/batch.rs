use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;
use crate::communication::Submission;
use crate::error::DispatchError;
use crate::protocol::BatchResult;

/// Where one submission's result goes, and which part of the batch is its own.
pub(crate) struct PendingSlot {
    slot: oneshot::Sender<BatchResult>,
    range: Range<usize>,
}

/// Outcome of delivering one batch to its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FanOut {
    /// Identifier shared by every caller of a successful batch
    pub batch_id: Option<Uuid>,

    /// Callers that received their result
    pub delivered: usize,

    /// Callers that went away before the result was ready
    pub abandoned: usize,
}

/// The open batch for one target path.
///
/// Instances of every admitted submission are concatenated in arrival order;
/// each submission remembers the contiguous range it occupies, so the
/// positionally aligned predictions can be split back along the same lines.
///
/// A `BatchState` is owned by the accumulator alone and is consumed by
/// [`BatchState::fan_out`], which leaves nothing behind for the next cycle.
pub(crate) struct BatchState {
    path: String,
    instances: Vec<Value>,
    started: Instant,
    pending: HashMap<Uuid, PendingSlot>,
}

impl BatchState {
    /// Opens an empty batch for `path`, aged from `started`.
    pub fn new(path: impl Into<String>, started: Instant) -> Self {
        Self {
            path: path.into(),
            instances: vec![],
            started,
            pending: HashMap::new(),
        }
    }

    /// Appends a submission's instances and records its slot.
    ///
    /// # Returns
    ///
    /// The range of the batch the submission now occupies
    pub fn admit(&mut self, submission: Submission) -> Range<usize> {
        let id = submission.id();
        let (instances, slot) = submission.into_parts();
        let start = self.instances.len();
        self.instances.extend(instances);
        let range = start..self.instances.len();
        self.pending.insert(id, PendingSlot { slot, range: range.clone() });
        range
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn instances(&self) -> &[Value] {
        &self.instances
    }

    /// Number of instances in the batch.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of callers waiting on this batch.
    pub fn callers(&self) -> usize {
        self.pending.len()
    }

    /// Evaluates the size and age triggers.
    #[inline]
    pub fn should_flush(&self, now: Instant, max_batch_size: usize, max_latency: Duration) -> bool {
        self.len() >= max_batch_size
            || (!self.is_empty() && now.saturating_duration_since(self.started) >= max_latency)
    }

    /// Delivers the downstream outcome to every caller in the batch.
    ///
    /// A failure, or predictions that do not line up one-to-one with the
    /// instances sent, is broadcast unchanged to all callers. Otherwise each
    /// caller receives its own slice under a batch identifier they all share.
    pub fn fan_out(self, outcome: Result<Vec<Value>, DispatchError>) -> FanOut {
        let outcome = outcome.and_then(|predictions| {
            if predictions.len() == self.instances.len() {
                Ok(predictions)
            } else {
                Err(DispatchError::SizeMismatch {
                    expected: self.instances.len(),
                    actual: predictions.len(),
                })
            }
        });

        let mut report = FanOut { batch_id: None, delivered: 0, abandoned: 0 };
        match outcome {
            Ok(predictions) => {
                let batch_id = Uuid::new_v4();
                report.batch_id = Some(batch_id);
                for (_, pending) in self.pending {
                    let slice = predictions[pending.range].to_vec();
                    Self::deliver(pending.slot, BatchResult::success(batch_id, slice), &mut report);
                }
            }
            Err(err) => {
                let failure = BatchResult::failure(err.to_string());
                for (_, pending) in self.pending {
                    Self::deliver(pending.slot, failure.clone(), &mut report);
                }
            }
        }
        report
    }

    #[inline]
    fn deliver(slot: oneshot::Sender<BatchResult>, result: BatchResult, report: &mut FanOut) {
        match slot.send(result) {
            Ok(_) => report.delivered += 1,
            // receiver dropped; the caller disconnected before the flush
            Err(_) => report.abandoned += 1,
        }
    }
}
