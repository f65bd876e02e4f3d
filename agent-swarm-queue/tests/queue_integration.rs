//! Queue ordering, retry and worker lifecycle tests

mod common;

use assert_matches::assert_matches;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_swarm_queue::{
    Error, InMemoryTaskQueue, QueuedTask, TaskPriority, TaskQueue, TaskState, Worker,
    WorkerConfig,
};

use common::CountingHandler;

fn priority_strategy() -> impl Strategy<Value = TaskPriority> {
    prop::sample::select(vec![
        TaskPriority::Low,
        TaskPriority::Normal,
        TaskPriority::High,
        TaskPriority::Critical,
    ])
}

proptest! {
    #[test]
    fn dequeue_order_is_priority_then_fifo(
        priorities in prop::collection::vec(priority_strategy(), 1..40)
    ) {
        let dequeued = tokio_test::block_on(async {
            let queue = InMemoryTaskQueue::new();
            for (index, priority) in priorities.iter().enumerate() {
                let task = QueuedTask::new(format!("task-{}", index), HashMap::new())
                    .with_priority(*priority)
                    .with_metadata("index", json!(index));
                queue.enqueue(task).await.unwrap();
            }

            let mut order = Vec::new();
            while let Some(task) = queue.dequeue("prop").await {
                order.push(task);
            }
            order
        });

        prop_assert_eq!(dequeued.len(), priorities.len());
        for pair in dequeued.windows(2) {
            prop_assert!(pair[0].priority >= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                let first = pair[0].metadata["index"].as_u64().unwrap();
                let second = pair[1].metadata["index"].as_u64().unwrap();
                prop_assert!(first < second);
            }
        }
    }
}

async fn wait_for_state(queue: &InMemoryTaskQueue, id: uuid::Uuid, state: TaskState) -> QueuedTask {
    loop {
        if let Some(task) = queue.get_status(id).await {
            if task.state == state {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_retries_exhaust_into_failure() {
    let queue = Arc::new(InMemoryTaskQueue::new());
    let handler = CountingHandler::with_delay(Duration::ZERO);
    let id = queue
        .enqueue(QueuedTask::new("fail-always", HashMap::new()).with_max_retries(2))
        .await
        .unwrap();

    let mut worker = Worker::new(
        WorkerConfig::new("retry-worker", Duration::from_millis(5)),
        queue.clone(),
        handler.clone(),
    );
    worker.start().unwrap();

    let task = wait_for_state(&queue, id, TaskState::Failed).await;
    worker.stop().await;

    assert_eq!(task.retry_count, 2);
    assert_eq!(task.error.as_deref(), Some("fail-always always fails"));
    assert!(task.completed_at.is_some());
    assert_eq!(handler.call_count(), 3);
    assert_eq!(worker.stats().tasks_failed, 3);
}

#[tokio::test]
async fn test_retried_task_completes_on_second_attempt() {
    let queue = Arc::new(InMemoryTaskQueue::new());
    let attempts = Arc::new(AtomicUsize::new(0));
    let handler = {
        let attempts = attempts.clone();
        Arc::new(move |task: QueuedTask| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    anyhow::bail!("{} flaked", task.name);
                }
                Ok(json!({"attempt": attempt + 1}))
            }
        })
    };
    let id = queue
        .enqueue(QueuedTask::new("flaky", HashMap::new()).with_max_retries(2))
        .await
        .unwrap();

    let mut worker = Worker::new(
        WorkerConfig::new("flaky-worker", Duration::from_millis(5)),
        queue.clone(),
        handler,
    );
    worker.start().unwrap();

    let task = wait_for_state(&queue, id, TaskState::Completed).await;
    worker.stop().await;

    assert_eq!(task.retry_count, 1);
    assert_eq!(task.result, Some(json!({"attempt": 2})));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let stats = worker.stats();
    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(stats.tasks_processed, 1);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_task() {
    let queue = Arc::new(InMemoryTaskQueue::new());
    let handler = CountingHandler::with_delay(Duration::from_millis(150));
    let id = queue
        .enqueue(QueuedTask::new("long-running", HashMap::new()))
        .await
        .unwrap();

    let mut worker = Worker::new(
        WorkerConfig::new("slow-worker", Duration::from_millis(5)),
        queue.clone(),
        handler.clone(),
    );
    worker.start().unwrap();
    wait_for_state(&queue, id, TaskState::Running).await;

    worker.stop().await;

    let task = queue.get_status(id).await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.result, Some(json!({"task": "long-running"})));
    assert!(!worker.is_running());
}

#[tokio::test]
async fn test_stopped_worker_leaves_remaining_tasks_pending() {
    let queue = Arc::new(InMemoryTaskQueue::new());
    let handler = CountingHandler::with_delay(Duration::from_millis(50));
    let first = queue
        .enqueue(QueuedTask::new("first", HashMap::new()).with_priority(TaskPriority::High))
        .await
        .unwrap();
    let second = queue
        .enqueue(QueuedTask::new("second", HashMap::new()))
        .await
        .unwrap();

    let mut worker = Worker::new(
        WorkerConfig::new("single", Duration::from_millis(5)),
        queue.clone(),
        handler.clone(),
    );
    worker.start().unwrap();
    wait_for_state(&queue, first, TaskState::Running).await;
    worker.stop().await;

    assert_eq!(queue.get_status(first).await.unwrap().state, TaskState::Completed);
    assert_eq!(queue.get_status(second).await.unwrap().state, TaskState::Pending);
    assert_eq!(handler.call_count(), 1);
}

#[tokio::test]
async fn test_duplicate_task_is_a_conflict() {
    let queue = InMemoryTaskQueue::new();
    let task = QueuedTask::new("once", HashMap::new());
    queue.enqueue(task.clone()).await.unwrap();
    assert_matches!(queue.enqueue(task).await, Err(Error::Conflict(_)));
}
