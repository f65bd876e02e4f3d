//! Asynchronous front end for the coordinator
//!
//! [`DistributedCoordinator`] turns `Coordinator::execute` into deferred work:
//! `submit` enqueues a request and returns its task id straight away, a
//! [`WorkerPool`] runs the request through a [`CoordinatorHandler`], and
//! `get_result` polls the queue until the outcome is stored.

use agent_swarm_core::config::QueueSettings;
use agent_swarm_core::orchestration::{Coordinator, WorkflowMode};
use agent_swarm_core::Context;
use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::pool::{PoolStats, WorkerPool};
use crate::queue::{QueueStats, TaskQueue};
use crate::task::{QueuedTask, TaskPriority, TaskState};
use crate::worker::{TaskHandler, WorkerConfig};
use crate::Result;

/// Name given to every task created by [`DistributedCoordinator::submit`]
pub const EXECUTE_TASK_NAME: &str = "coordinator.execute";

/// Runs queued requests through a shared [`Coordinator`]
///
/// The payload must carry a `request` string and may carry a `context`
/// object. The stored result is `{content, success, agents_used}`.
pub struct CoordinatorHandler {
    coordinator: Arc<Coordinator>,
}

impl CoordinatorHandler {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl TaskHandler for CoordinatorHandler {
    async fn handle(&self, task: QueuedTask) -> anyhow::Result<Value> {
        let request = task
            .payload
            .get("request")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("task {} has no request in its payload", task.id))?;

        let context: Context = match task.payload.get("context") {
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            _ => Context::new(),
        };

        let result = self
            .coordinator
            .execute(request, context, WorkflowMode::Adaptive)
            .await;

        Ok(json!({
            "content": result.content,
            "success": result.success(),
            "agents_used": result.agents_used,
        }))
    }
}

/// Queue and worker statistics for a distributed coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributedStats {
    pub queue: QueueStats,
    pub pool: Option<PoolStats>,
}

/// Submits coordinator requests to a task queue and collects their results
pub struct DistributedCoordinator {
    coordinator: Arc<Coordinator>,
    queue: Arc<dyn TaskQueue>,
    pool: Mutex<Option<WorkerPool>>,
    settings: QueueSettings,
}

impl DistributedCoordinator {
    pub fn new(coordinator: Arc<Coordinator>, queue: Arc<dyn TaskQueue>, settings: QueueSettings) -> Self {
        Self {
            coordinator,
            queue,
            pool: Mutex::new(None),
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Start the worker pool; a second call while running is a no-op
    pub async fn start(&self) -> Result<()> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            debug!("Distributed coordinator already running");
            return Ok(());
        }

        let handler: Arc<dyn TaskHandler> =
            Arc::new(CoordinatorHandler::new(Arc::clone(&self.coordinator)));
        let mut workers = WorkerPool::new(
            Arc::clone(&self.queue),
            handler,
            self.settings.worker_count,
            WorkerConfig::new(
                self.settings.worker_id_prefix.clone(),
                self.settings.poll_interval(),
            ),
        );
        workers.start().await?;
        *pool = Some(workers);

        info!(
            "Distributed coordinator started with {} workers",
            self.settings.worker_count
        );
        Ok(())
    }

    /// Stop all workers after their in-flight tasks finish
    pub async fn stop(&self) {
        if let Some(mut workers) = self.pool.lock().await.take() {
            workers.stop().await;
            info!("Distributed coordinator stopped");
        }
    }

    /// Resize the running pool; does nothing before `start`
    pub async fn scale(&self, worker_count: usize) -> Result<()> {
        match self.pool.lock().await.as_mut() {
            Some(workers) => workers.scale(worker_count).await,
            None => {
                debug!("Scale to {} ignored, coordinator not started", worker_count);
                Ok(())
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    /// Enqueue a request and return its task id without waiting for it
    pub async fn submit(&self, request: &str, context: Context, priority: TaskPriority) -> Result<Uuid> {
        let mut payload = HashMap::new();
        payload.insert("request".to_string(), json!(request));
        payload.insert(
            "context".to_string(),
            Value::Object(context.into_iter().collect()),
        );

        let task = QueuedTask::new(EXECUTE_TASK_NAME, payload)
            .with_priority(priority)
            .with_max_retries(self.settings.default_max_retries);

        let id = self.queue.enqueue(task).await?;
        debug!("Submitted request as task {} ({:?})", id, priority);
        Ok(id)
    }

    /// Wait up to `timeout` for the outcome of a submitted task
    ///
    /// Returns the stored result of a completed task, or
    /// `{"success": false, "error": ..}` for a failed or cancelled one.
    /// `None` means the id is unknown or the deadline passed; the task itself
    /// keeps running.
    pub async fn get_result(&self, task_id: Uuid, timeout: Duration) -> Option<Value> {
        let interval = self.settings.result_poll_interval();
        let poll = async {
            loop {
                let task = self.queue.get_status(task_id).await?;
                match task.state {
                    TaskState::Completed => return Some(task.result.unwrap_or(Value::Null)),
                    TaskState::Failed => {
                        return Some(json!({
                            "success": false,
                            "error": task.error.unwrap_or_else(|| "unknown error".to_string()),
                        }))
                    }
                    TaskState::Cancelled => {
                        return Some(json!({"success": false, "error": "cancelled"}))
                    }
                    _ => tokio::time::sleep(interval).await,
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("Timed out after {:?} waiting for task {}", timeout, task_id);
                None
            }
        }
    }

    pub async fn stats(&self) -> DistributedStats {
        let queue = self.queue.stats().await;
        let pool = self.pool.lock().await.as_ref().map(WorkerPool::stats);
        DistributedStats { queue, pool }
    }
}
