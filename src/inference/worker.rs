use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use super::EngineError;

/// Bounded pool for blocking inference jobs.
///
/// Jobs run on tokio's blocking threads so the dispatch loop keeps serving
/// other requests; the semaphore caps how many run at once. Callers await the
/// job's result.
#[derive(Clone)]
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

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<T, F>(&self, job: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Worker(format!("worker pool closed: {e}")))?;

        debug!(available = self.permits.available_permits(), "job dispatched");

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| EngineError::Worker(format!("worker thread failed: {e}")))?
    }
}
