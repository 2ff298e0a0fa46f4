//! Cancellable background-task handles
//!
//! Question timers, heartbeat probes and grace-expiry actions all run as
//! spawned tasks that may need to be cancelled early. [`TaskHandle`]
//! wraps the spawned task behind a `cancel()` that is safe to call any
//! number of times, from any state, without surfacing an error.

use std::sync::Mutex;

use tokio::task::JoinHandle;

/// Handle to at most one cancellable background task
///
/// Setting a new task cancels the previous one; cancelling an empty or
/// already-finished handle is a no-op. Dropping the handle aborts the
/// task, so a handle can never leak its task past its owner.
#[derive(Debug, Default)]
pub struct TaskHandle {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHandle {
    /// Creates an empty handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a newly spawned task, cancelling any previous one
    pub fn replace(&self, task: JoinHandle<()>) {
        let previous = self
            .task
            .lock()
            .expect("task handle lock poisoned")
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancels the running task, if any
    ///
    /// Idempotent: cancelling twice, or cancelling a task that already
    /// finished, does nothing.
    pub fn cancel(&self) {
        if let Some(task) = self.task.lock().expect("task handle lock poisoned").take() {
            task.abort();
        }
    }

    /// Whether a task is currently registered and not yet finished
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("task handle lock poisoned")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
