use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;
use crate::protocol::BatchResult;
use super::ticket::Ticket;

/// # Submission
///
/// One caller's instances, paired with the private slot its result is
/// delivered through.
///
/// A `Submission` is created by the ingress side of the batcher and handed to
/// the accumulator, which becomes its sole owner. The paired [`Ticket`] stays
/// with the caller and resolves once the accumulator fills the slot.
///
/// ## Delivery Guarantee
///
/// The slot is a Tokio oneshot sender. Sending consumes it, so a submission
/// can be answered at most once.
pub(crate) struct Submission {
    /// Identity of this submission inside a batch
    id: Uuid,

    /// The caller's instances, in request order
    instances: Vec<Value>,

    /// Request path the caller targeted
    path: String,

    /// Channel for sending the result back to the caller
    slot: oneshot::Sender<BatchResult>,
}

impl Submission {
    /// Creates a new submission and the ticket its caller waits on.
    ///
    /// # Parameters
    ///
    /// * `instances` - The decoded instances of one request
    /// * `path` - The request path these instances are destined for
    ///
    /// # Returns
    ///
    /// The submission to hand to the accumulator and the caller's [`Ticket`]
    pub fn new(instances: Vec<Value>, path: impl Into<String>) -> (Self, Ticket) {
        let (slot, receiver) = oneshot::channel();
        let submission = Self {
            id: Uuid::new_v4(),
            instances,
            path: path.into(),
            slot,
        };
        (submission, Ticket::new(receiver))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of instances this submission contributes to a batch.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Splits the submission into its instances and result slot.
    pub fn into_parts(self) -> (Vec<Value>, oneshot::Sender<BatchResult>) {
        (self.instances, self.slot)
    }
}
