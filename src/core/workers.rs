use crate::utils::error::{RepricerError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub const DEFAULT_CPU_WORKERS: usize = 4;

/// Bounded pool for CPU-bound tabular work. Shared by every tenant so that a
/// large merge in one tenant cannot starve the others' I/O waits.
#[derive(Debug, Clone)]
pub struct CpuPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl CpuPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` on the blocking thread pool once one of the worker slots is free.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RepricerError::ProcessingError {
                message: "worker pool closed".to_string(),
            })?;
        let output = tokio::task::spawn_blocking(job).await?;
        Ok(output)
    }
}

impl Default for CpuPool {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_WORKERS)
    }
}
