use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn, Instrument, Span};
use crate::communication::Submission;
use crate::config::BatcherConfig;
use super::batch::BatchState;
use super::dispatch::dispatch;
use super::downstream::Downstream;
use super::worker::WorkerHandle;

/// Starts an accumulator on the current Tokio runtime.
///
/// The returned sender is the hand-off every ingress task submits through.
/// It has room for a single submission, so a submitter waits until the
/// accumulator loop takes the previous one.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub(crate) fn spawn<D>(
    config: BatcherConfig,
    downstream: Arc<D>,
    span: Span,
) -> (mpsc::Sender<Submission>, WorkerHandle)
where D: Downstream + ?Sized
{
    let (sender, receiver) = mpsc::channel(1);
    let worker = WorkerHandle::new(move |running, notifier| {
        let accumulator = Accumulator::new(config, downstream);
        tokio::spawn(accumulator.run(receiver, running, notifier).instrument(span))
    });
    (sender, worker)
}

/// The single owner of a batcher's open batches.
///
/// Batches are keyed by target path: submissions for different paths never
/// share a downstream call. Flushes run inline in the accumulator loop, so at
/// most one downstream call is in flight per accumulator.
pub(crate) struct Accumulator<D: ?Sized> {
    config: BatcherConfig,
    downstream: Arc<D>,
    batches: HashMap<String, BatchState>,
}

impl<D> Accumulator<D>
where D: Downstream + ?Sized
{
    pub fn new(config: BatcherConfig, downstream: Arc<D>) -> Self {
        Self {
            config,
            downstream,
            batches: HashMap::new(),
        }
    }

    /// Runs until the running flag is cleared or every submitter is gone.
    ///
    /// Each iteration waits for whichever comes first: a submission, a stop
    /// notification, or the poll interval. Triggers are evaluated after every
    /// wake-up. On the way out, submissions already handed off are admitted
    /// and every open batch is flushed, so no admitted caller is left waiting.
    pub async fn run(
        mut self,
        mut submissions: mpsc::Receiver<Submission>,
        running: Arc<AtomicBool>,
        notifier: Arc<Notify>,
    ) {
        info!(
            target: "predbatch::accumulator",
            max_batch_size = self.config.max_batch_size,
            max_latency_ms = self.config.max_latency.as_millis() as u64,
            "accumulator started"
        );

        loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = notifier.notified() => {}
                received = submissions.recv() => match received {
                    Some(submission) => self.admit(submission),
                    None => break,
                },
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            self.flush_ready().await;
        }

        submissions.close();
        while let Ok(submission) = submissions.try_recv() {
            self.admit(submission);
        }
        self.flush_all().await;

        info!(target: "predbatch::accumulator", "accumulator stopped");
    }

    fn admit(&mut self, submission: Submission) {
        let now = Instant::now();
        let size = submission.len();
        let batch = self
            .batches
            .entry(submission.path().to_owned())
            .or_insert_with_key(|path| BatchState::new(path.clone(), now));
        let range = batch.admit(submission);
        trace!(
            target: "predbatch::accumulator",
            path = %batch.path(),
            size,
            start = range.start,
            end = range.end,
            "submission admitted"
        );
    }

    async fn flush_ready(&mut self) {
        let now = Instant::now();
        let ready: Vec<String> = self
            .batches
            .iter()
            .filter(|(_, batch)| {
                batch.should_flush(now, self.config.max_batch_size, self.config.max_latency)
            })
            .map(|(path, _)| path.clone())
            .collect();

        for path in ready {
            if let Some(batch) = self.batches.remove(&path) {
                self.flush(batch).await;
            }
        }
    }

    async fn flush_all(&mut self) {
        let batches: Vec<BatchState> = self.batches.drain().map(|(_, batch)| batch).collect();
        for batch in batches {
            self.flush(batch).await;
        }
    }

    async fn flush(&self, batch: BatchState) {
        let started = Instant::now();
        let path = batch.path().to_owned();
        let size = batch.len();
        let callers = batch.callers();

        let outcome = dispatch(self.downstream.as_ref(), &path, batch.instances()).await;
        if let Err(err) = &outcome {
            warn!(
                target: "predbatch::dispatch",
                path = %path,
                size,
                callers,
                error = %err,
                "batch failed"
            );
        }

        let report = batch.fan_out(outcome);
        debug!(
            target: "predbatch::dispatch",
            path = %path,
            batch_id = ?report.batch_id,
            size,
            delivered = report.delivered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch flushed"
        );
        if report.abandoned > 0 {
            warn!(
                target: "predbatch::dispatch",
                path = %path,
                abandoned = report.abandoned,
                "callers left before their batch completed"
            );
        }
    }
}
