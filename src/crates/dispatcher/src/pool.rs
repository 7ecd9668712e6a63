//! Bounded worker pool for task-runner jobs
//!
//! One pool is shared by every dispatch in the process; sublattice
//! dispatches submit recursively into the same pool. Saturation deadlock
//! under deep recursion is the operator's concern: size the pool to the
//! expected sublattice depth.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Semaphore-bounded pool over the tokio runtime
#[derive(Clone, Debug)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl TaskPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of currently idle workers
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawn a job; it runs once a worker permit is available
    pub fn submit<F, T>(&self, job: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.expect("task pool semaphore closed");
            job.await
        })
    }
}
