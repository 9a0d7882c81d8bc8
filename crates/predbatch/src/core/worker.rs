//! Lifecycle of the background accumulator task.

use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::{task::JoinHandle, sync::Notify};

/// A handle for managing the background task that owns a batcher's state.
///
/// The task is given a running flag and a notifier. Clearing the flag and
/// notifying asks it to stop; the task is expected to flush whatever it has
/// accumulated before returning.
///
/// Dropping the handle does not stop the task. It keeps running detached
/// until it is told to stop or runs out of work on its own.
///
/// # Example
///
/// ```ignore
/// let worker = WorkerHandle::new(|running, notifier| {
///     tokio::spawn(async move {
///         while running.load(Ordering::SeqCst) {
///             tokio::select! {
///                 _ = notifier.notified() => {},
///                 _ = tokio::time::sleep(Duration::from_millis(1)) => {},
///             }
///         }
///     })
/// });
///
/// worker.shutdown();
/// worker.wait().await;
/// ```
pub(crate) struct WorkerHandle {
    /// Flag indicating whether the background task should continue running
    running: Arc<AtomicBool>,

    /// Handle to the spawned task, becomes `None` once someone waits on it
    handle: Mutex<Option<JoinHandle<()>>>,

    /// Wakes the background task so it observes the running flag
    notifier: Arc<Notify>,
}

impl WorkerHandle {
    /// Spawns the background task through `task`.
    ///
    /// # Parameters
    ///
    /// * `task` - Receives the running flag and notifier and returns the
    ///   `JoinHandle` of the spawned task
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, Arc<Notify>) -> JoinHandle<()>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        let handle = task(running.clone(), notifier.clone());

        Self {
            running,
            handle: Mutex::new(Some(handle)),
            notifier,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks the background task to stop. Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();
    }

    /// Waits for the background task to finish.
    ///
    /// Only the first caller actually waits; later calls return immediately.
    pub async fn wait(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
