//! Pool of named workers sharing one queue and handler

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::queue::TaskQueue;
use crate::worker::{TaskHandler, Worker, WorkerConfig, WorkerStats};
use crate::Result;

/// Aggregated pool statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub worker_count: usize,
    pub workers: Vec<WorkerStats>,
    pub total_processed: u64,
    pub total_failed: u64,
}

/// Set of workers named `<base>-0`, `<base>-1`, ...
pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    base_id: String,
    poll_interval: Duration,
    target_count: usize,
    workers: Vec<Worker>,
    // counters of workers removed by scale-down or stop
    retired_processed: u64,
    retired_failed: u64,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        handler: Arc<dyn TaskHandler>,
        worker_count: usize,
        base_config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            base_id: base_config.worker_id,
            poll_interval: base_config.poll_interval,
            target_count: worker_count,
            workers: Vec::new(),
            retired_processed: 0,
            retired_failed: 0,
        }
    }

    /// Number of live workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Start the configured number of workers
    pub async fn start(&mut self) -> Result<()> {
        let target = self.target_count;
        self.grow_to(target)?;
        info!("Worker pool {} started with {} workers", self.base_id, self.workers.len());
        Ok(())
    }

    /// Stop every worker, waiting for in-flight tasks
    pub async fn stop(&mut self) {
        while let Some(worker) = self.workers.pop() {
            self.retire(worker).await;
        }
        info!("Worker pool {} stopped", self.base_id);
    }

    /// Grow or shrink the pool to `new_count` workers
    ///
    /// Removed workers are the most recently started ones; each finishes its
    /// current task before it goes away.
    pub async fn scale(&mut self, new_count: usize) -> Result<()> {
        let current = self.workers.len();
        if new_count > current {
            self.grow_to(new_count)?;
        } else {
            while self.workers.len() > new_count {
                if let Some(worker) = self.workers.pop() {
                    self.retire(worker).await;
                }
            }
        }

        self.target_count = new_count;
        info!(
            "Worker pool {} scaled from {} to {} workers",
            self.base_id, current, new_count
        );
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let workers: Vec<WorkerStats> = self.workers.iter().map(Worker::stats).collect();
        PoolStats {
            worker_count: workers.len(),
            total_processed: self.retired_processed
                + workers.iter().map(|w| w.tasks_processed).sum::<u64>(),
            total_failed: self.retired_failed + workers.iter().map(|w| w.tasks_failed).sum::<u64>(),
            workers,
        }
    }

    async fn retire(&mut self, mut worker: Worker) {
        worker.stop().await;
        let stats = worker.stats();
        self.retired_processed += stats.tasks_processed;
        self.retired_failed += stats.tasks_failed;
    }

    fn grow_to(&mut self, count: usize) -> Result<()> {
        for index in self.workers.len()..count {
            let config = WorkerConfig::new(format!("{}-{}", self.base_id, index), self.poll_interval);
            let mut worker = Worker::new(config, Arc::clone(&self.queue), Arc::clone(&self.handler));
            worker.start()?;
            self.workers.push(worker);
        }
        Ok(())
    }
}
