use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::interface::CompareError;

/// Concurrency-limited async queue for per-screen comparisons.
///
/// Each comparison decodes two full screenshots, so the number running at once
/// bounds peak memory as well as CPU.
#[derive(Clone)]
pub struct ComparisonQueue {
    semaphore: Arc<Semaphore>,
}

impl ComparisonQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Enqueue a comparison task. The task will execute once a semaphore permit
    /// is acquired, limiting concurrency to `max_concurrent`.
    pub fn enqueue<T, F, Fut>(&self, task: F) -> JoinHandle<Result<T, CompareError>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CompareError>> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| CompareError::Internal(format!("Queue error: {}", e)))?;
            task().await
        })
    }

    /// Number of currently available permits (free slots).
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
