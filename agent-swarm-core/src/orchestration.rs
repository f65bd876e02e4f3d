//! Multi-agent task orchestration
//!
//! This module turns a request into a plan of tasks and executes that plan
//! against registered agents:
//! - Capability detection and adaptive mode selection
//! - Sequential, parallel and conditional execution strategies
//! - Per-agent circuit breaker protection with optional retries
//! - Synthesis of several agent responses into one answer
//!
//! # Architecture
//!
//! ```text
//! Request
//!     |
//!     v
//! Coordinator::create_plan (capability keywords -> AgentRegistry)
//!     |
//!     v
//! ExecutionPlan (tasks + resolved WorkflowMode)
//!     |
//!     v
//! WorkflowExecutor (Sequential | Parallel | Conditional)
//!     |            \
//!     v             CircuitBreakerRegistry (one breaker per agent)
//! Agent::process
//!     |
//!     v
//! Synthesizer -> CoordinatorResult
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use agent_swarm_core::orchestration::{Coordinator, WorkflowMode};
//! use agent_swarm_core::config::OrchestratorConfig;
//! use agent_swarm_core::{AgentRegistry, Context};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let registry = Arc::new(AgentRegistry::new());
//!     // registry.register(Arc::new(MyAgent), 0)?;
//!     let coordinator = Coordinator::from_config(registry, &OrchestratorConfig::default());
//!
//!     let result = coordinator
//!         .execute("Research Rust and then write a summary", Context::new(), WorkflowMode::Adaptive)
//!         .await;
//!     println!("{} ({} tasks completed)", result.content, result.tasks_completed);
//! }
//! ```

pub mod coordinator;
pub mod models;
pub mod workflow;

pub use coordinator::{detect_capabilities, has_dependencies, Coordinator};
pub use models::{
    CoordinatorResult, ExecutionPlan, InputTransform, Predicate, StepOptions, Task, TaskStatus,
    WorkflowMode, WorkflowStatus,
};
pub use workflow::{
    default_aggregate, AfterStepHook, Aggregator, BeforeStepHook, Branch, ConditionalRouting,
    Strategy, WorkflowExecutor, WorkflowResult, WorkflowRun,
};
