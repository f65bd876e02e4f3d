//! Queue-draining workers
//!
//! A [`Worker`] owns one background task that claims work from a
//! [`TaskQueue`], hands it to a [`TaskHandler`] and reports the outcome back
//! to the queue. Stopping a worker ends its poll loop but never interrupts a
//! handler that is already running.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::queue::TaskQueue;
use crate::task::QueuedTask;
use crate::{Error, Result};

/// Time allowed for an in-flight handler to finish when a worker stops
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(300);

/// Bridges a queued task to the code that actually performs it
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: QueuedTask) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(QueuedTask) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, task: QueuedTask) -> anyhow::Result<Value> {
        (self)(task).await
    }
}

/// Configuration for a single worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            worker_id: format!("worker-{}", &suffix[..8]),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn new<S: Into<String>>(worker_id: S, poll_interval: Duration) -> Self {
        Self {
            worker_id: worker_id.into(),
            poll_interval,
        }
    }
}

/// Snapshot of a worker's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub running: bool,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub average_processing_time_ms: f64,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    processing_time_ms: AtomicU64,
}

impl WorkerCounters {
    fn record(&self, succeeded: bool, elapsed: Duration) {
        if succeeded {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.processing_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn average_processing_time_ms(&self) -> f64 {
        let handled =
            self.processed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed);
        if handled == 0 {
            return 0.0;
        }
        self.processing_time_ms.load(Ordering::Relaxed) as f64 / handled as f64
    }
}

/// A single poller draining a task queue
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<dyn TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    counters: Arc<WorkerCounters>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, queue: Arc<dyn TaskQueue>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            config,
            queue,
            handler,
            counters: Arc::new(WorkerCounters::default()),
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the poll loop on the current runtime
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::Conflict(format!(
                "Worker {} is already running",
                self.config.worker_id
            )));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker_id = self.config.worker_id.clone();
        let poll_interval = self.config.poll_interval;
        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        let counters = Arc::clone(&self.counters);

        let handle = tokio::spawn(run_loop(
            worker_id.clone(),
            poll_interval,
            queue,
            handler,
            counters,
            shutdown_rx,
        ));

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
        info!("Worker {} started", worker_id);
        Ok(())
    }

    /// Stop polling and wait for any in-flight task to finish
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }

        if let Some(handle) = self.handle.take() {
            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Worker {} loop ended abnormally: {}", self.config.worker_id, e),
                Err(_) => warn!(
                    "Worker {} did not stop within {:?}",
                    self.config.worker_id, GRACEFUL_SHUTDOWN_TIMEOUT
                ),
            }
            info!("Worker {} stopped", self.config.worker_id);
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            worker_id: self.config.worker_id.clone(),
            running: self.is_running(),
            tasks_processed: self.counters.processed.load(Ordering::Relaxed),
            tasks_failed: self.counters.failed.load(Ordering::Relaxed),
            average_processing_time_ms: self.counters.average_processing_time_ms(),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

async fn run_loop(
    worker_id: String,
    poll_interval: Duration,
    queue: Arc<dyn TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    counters: Arc<WorkerCounters>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let task = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            task = queue.wait_for_task(&worker_id, poll_interval) => task,
        };

        // the handler runs outside the select so shutdown never preempts it
        process_task(&worker_id, queue.as_ref(), handler.as_ref(), &counters, task).await;
    }
    debug!("Worker {} poll loop exited", worker_id);
}

async fn process_task(
    worker_id: &str,
    queue: &dyn TaskQueue,
    handler: &dyn TaskHandler,
    counters: &WorkerCounters,
    task: QueuedTask,
) {
    let task_id = task.id;
    let started = Instant::now();
    debug!("Worker {} processing task {} ({})", worker_id, task_id, task.name);

    let outcome = AssertUnwindSafe(handler.handle(task)).catch_unwind().await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok(result)) => {
            if !queue.complete(task_id, result).await {
                warn!("Task {} was no longer running when it completed", task_id);
            }
            counters.record(true, elapsed);
            debug!("Worker {} completed task {} in {:?}", worker_id, task_id, elapsed);
        }
        Ok(Err(e)) => {
            if !queue.fail(task_id, &e.to_string()).await {
                warn!("Task {} was no longer running when it failed", task_id);
            }
            counters.record(false, elapsed);
            warn!("Worker {} failed task {}: {}", worker_id, task_id, e);
        }
        Err(_) => {
            if !queue.fail(task_id, "handler panicked").await {
                warn!("Task {} was no longer running when its handler panicked", task_id);
            }
            counters.record(false, elapsed);
            error!("Worker {} handler panicked on task {}", worker_id, task_id);
        }
    }
}
