//! Shared handlers and agents for the queue integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_swarm_core::config::{QueueSettings, WorkflowConfig};
use agent_swarm_core::orchestration::Coordinator;
use agent_swarm_core::{
    Agent, AgentRegistry, AgentResponse, Capability, CircuitBreakerConfig,
    CircuitBreakerRegistry, Context,
};
use agent_swarm_queue::{QueuedTask, TaskHandler};

/// Counts invocations and fails tasks whose name starts with `fail`
#[derive(Default)]
pub struct CountingHandler {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl CountingHandler {
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for CountingHandler {
    async fn handle(&self, task: QueuedTask) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if task.name.starts_with("fail") {
            anyhow::bail!("{} always fails", task.name);
        }
        Ok(json!({"task": task.name}))
    }
}

/// Conversational agent that echoes its input and counts calls
pub struct EchoAgent {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        "echo"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Conversation]
    }

    async fn process(&self, text: &str, _context: &Context) -> agent_swarm_core::Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AgentResponse::success("echo", format!("echo: {}", text)))
    }
}

/// Coordinator backed by a single registered [`EchoAgent`]
pub fn echo_coordinator() -> (Arc<Coordinator>, Arc<EchoAgent>) {
    let agent = Arc::new(EchoAgent {
        calls: AtomicUsize::new(0),
    });
    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(agent.clone() as Arc<dyn Agent>, 0)
        .unwrap();
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    let coordinator = Coordinator::new(registry, breakers, WorkflowConfig::default());
    (Arc::new(coordinator), agent)
}

/// Fast-polling queue settings for tests
pub fn fast_settings(worker_count: usize) -> QueueSettings {
    QueueSettings {
        worker_count,
        worker_id_prefix: "test-worker".to_string(),
        poll_interval_ms: 5,
        result_poll_interval_ms: 5,
        default_max_retries: 0,
    }
}
