//! Priority task queue
//!
//! [`TaskQueue`] is the seam between workers and the storage of pending
//! work. [`InMemoryTaskQueue`] keeps everything in process behind a single
//! mutex; a broker-backed queue can implement the same trait and override
//! [`TaskQueue::wait_for_task`] with a blocking receive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::task::{QueuedTask, TaskState};
use crate::{Error, Result};

/// Counts of tasks by where they currently live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Storage and ordering of deferred work
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a task, keeping pending tasks ordered by descending priority
    async fn enqueue(&self, task: QueuedTask) -> Result<Uuid>;

    /// Claim the highest-priority pending task for `worker_id`
    async fn dequeue(&self, worker_id: &str) -> Option<QueuedTask>;

    /// Mark a running task completed; false if it is not running
    async fn complete(&self, task_id: Uuid, result: Value) -> bool;

    /// Record a failure of a running task, requeueing it while retries remain
    async fn fail(&self, task_id: Uuid, error: &str) -> bool;

    async fn get_status(&self, task_id: Uuid) -> Option<QueuedTask>;

    /// Cancel a task that has not started yet
    async fn cancel(&self, task_id: Uuid) -> bool;

    async fn pending_count(&self) -> usize;

    async fn stats(&self) -> QueueStats;

    /// Drop finished tasks whose completion time is before `older_than`
    async fn purge_finished(&self, older_than: DateTime<Utc>) -> usize;

    /// Wait until a task can be claimed for `worker_id`
    ///
    /// The default polls [`TaskQueue::dequeue`], sleeping `poll_interval`
    /// whenever the queue is empty. Dropping the returned future must never
    /// lose a claimed task.
    async fn wait_for_task(&self, worker_id: &str, poll_interval: Duration) -> QueuedTask {
        loop {
            if let Some(task) = self.dequeue(worker_id).await {
                return task;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<QueuedTask>,
    processing: HashMap<Uuid, QueuedTask>,
    finished: HashMap<Uuid, QueuedTask>,
}

impl QueueState {
    /// Insert before the first task with strictly lower priority
    fn insert_pending(&mut self, task: QueuedTask) {
        let position = self
            .pending
            .iter()
            .position(|t| t.priority < task.priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(position, task);
    }

    fn contains(&self, id: Uuid) -> bool {
        self.processing.contains_key(&id)
            || self.finished.contains_key(&id)
            || self.pending.iter().any(|t| t.id == id)
    }
}

/// Process-local task queue
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: QueuedTask) -> Result<Uuid> {
        let mut state = self.state.lock().await;
        if state.contains(task.id) {
            return Err(Error::Conflict(format!("Task {} already queued", task.id)));
        }

        let id = task.id;
        debug!("Enqueued task {} ({}, {:?})", id, task.name, task.priority);
        state.insert_pending(task);
        Ok(id)
    }

    async fn dequeue(&self, worker_id: &str) -> Option<QueuedTask> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            return None;
        }

        let mut task = state.pending.remove(0);
        task.state = TaskState::Running;
        task.started_at = Some(Utc::now());
        task.worker_id = Some(worker_id.to_string());
        state.processing.insert(task.id, task.clone());

        debug!("Worker {} claimed task {}", worker_id, task.id);
        Some(task)
    }

    async fn complete(&self, task_id: Uuid, result: Value) -> bool {
        let mut state = self.state.lock().await;
        let Some(mut task) = state.processing.remove(&task_id) else {
            return false;
        };

        task.state = TaskState::Completed;
        task.result = Some(result);
        task.completed_at = Some(Utc::now());
        state.finished.insert(task_id, task);
        true
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(mut task) = state.processing.remove(&task_id) else {
            return false;
        };

        task.error = Some(error.to_string());
        if task.can_retry() {
            task.retry_count += 1;
            task.state = TaskState::Retrying;
            task.worker_id = None;
            warn!(
                "Task {} failed, retrying ({}/{}): {}",
                task_id, task.retry_count, task.max_retries, error
            );
            state.insert_pending(task);
        } else {
            task.state = TaskState::Failed;
            task.completed_at = Some(Utc::now());
            warn!(
                "Task {} failed after {} retries: {}",
                task_id, task.retry_count, error
            );
            state.finished.insert(task_id, task);
        }
        true
    }

    async fn get_status(&self, task_id: Uuid) -> Option<QueuedTask> {
        let state = self.state.lock().await;
        state
            .processing
            .get(&task_id)
            .or_else(|| state.finished.get(&task_id))
            .or_else(|| state.pending.iter().find(|t| t.id == task_id))
            .cloned()
    }

    async fn cancel(&self, task_id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        let Some(position) = state.pending.iter().position(|t| t.id == task_id) else {
            return false;
        };

        let mut task = state.pending.remove(position);
        task.state = TaskState::Cancelled;
        task.completed_at = Some(Utc::now());
        info!("Cancelled task {}", task_id);
        state.finished.insert(task_id, task);
        true
    }

    async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let count = |wanted: TaskState| {
            state
                .finished
                .values()
                .filter(|t| t.state == wanted)
                .count()
        };

        QueueStats {
            pending: state.pending.len(),
            processing: state.processing.len(),
            completed: count(TaskState::Completed),
            failed: count(TaskState::Failed),
            cancelled: count(TaskState::Cancelled),
        }
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.finished.len();
        state
            .finished
            .retain(|_, t| t.completed_at.map_or(true, |done| done >= older_than));
        let purged = before - state.finished.len();
        if purged > 0 {
            info!("Purged {} finished tasks", purged);
        }
        purged
    }
}
