//! Bounded pool for background encryption tasks
//!
//! Tasks run on the tokio runtime but only `size` of them make progress at
//! once. Each task gets a [`CancellationToken`] and must watch it at its
//! await points; aborting the task is the fallback when it does not.

use crate::ClientError;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled")]
    Cancelled,
}

impl From<TaskError> for ClientError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::TimedOut(grace) => ClientError::TaskTimeout(grace),
            other => ClientError::Encryption(other.to_string()),
        }
    }
}

/// Shared pool of `size` worker slots
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not held by a running task
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queue `job` for execution. The job starts once a slot is free and
    /// holds it until it returns or is aborted.
    pub fn spawn<F, Fut, T>(&self, job: F) -> TaskHandle<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let permits = self.permits.clone();

        let handle = tokio::spawn(async move {
            // A job cancelled while queued never starts.
            let _permit = tokio::select! {
                biased;
                _ = child.cancelled() => return Err(TaskError::Cancelled),
                // The semaphore is never closed while a pool handle exists.
                permit = permits.acquire_owned() => permit.map_err(|_| TaskError::Cancelled)?,
            };
            Ok(job(child).await)
        });

        TaskHandle { token, handle }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Handle to a pooled task. Dropping it cancels the task.
pub struct TaskHandle<T> {
    token: CancellationToken,
    handle: JoinHandle<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Ask the task to stop at its next await point
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait up to `grace` for the task. On expiry the task is cancelled
    /// and aborted, releasing its slot.
    pub async fn join(mut self, grace: Duration) -> Result<T, TaskError> {
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(TaskError::Panicked(message))
            }
            Ok(Err(_)) => Err(TaskError::Cancelled),
            Err(_) => {
                self.token.cancel();
                self.handle.abort();
                Err(TaskError::TimedOut(grace))
            }
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
