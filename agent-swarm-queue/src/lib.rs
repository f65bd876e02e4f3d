//! Deferred execution for Agent Swarm
//!
//! This crate queues work for later execution: a priority [`TaskQueue`],
//! [`Worker`]s and a [`WorkerPool`] that drain it, and a
//! [`DistributedCoordinator`] that runs coordinator requests through the
//! queue so callers can submit now and collect the result later.

pub mod distributed;
pub mod error;
pub mod pool;
pub mod queue;
pub mod task;
pub mod worker;

pub use distributed::{CoordinatorHandler, DistributedCoordinator, DistributedStats};
pub use error::{Error, Result};
pub use pool::{PoolStats, WorkerPool};
pub use queue::{InMemoryTaskQueue, QueueStats, TaskQueue};
pub use task::{QueuedTask, TaskPriority, TaskState};
pub use worker::{TaskHandler, Worker, WorkerConfig, WorkerStats};

/// Re-export core types for convenience
pub use agent_swarm_core as core;
