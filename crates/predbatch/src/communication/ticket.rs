use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::protocol::BatchResult;

/// # Ticket
///
/// The caller's half of a submission: an awaitable wrapper around the
/// oneshot receiver the accumulator delivers the batch outcome through.
///
/// Resolves to `Err` only if the accumulator dropped the submission without
/// answering it, which happens when the batcher has been shut down.
pub(crate) struct Ticket {
    /// The underlying channel receiver
    receiver: oneshot::Receiver<BatchResult>
}

impl Ticket {
    pub fn new(receiver: oneshot::Receiver<BatchResult>) -> Self {
        Self {
            receiver,
        }
    }
}

impl Future for Ticket {
    type Output = Result<BatchResult, oneshot::error::RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver).poll(cx)
    }
}
