//! Shared mock agents for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_swarm_core::{
    Agent, AgentRegistry, AgentResponse, Capability, CircuitBreakerConfig,
    CircuitBreakerRegistry, Context, Error, Result,
};

/// Replies with `<name>: <text>`
pub struct EchoAgent {
    name: String,
    capabilities: Vec<Capability>,
    pub calls: AtomicUsize,
}

impl EchoAgent {
    pub fn new(name: &str, capabilities: &[Capability]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            capabilities: capabilities.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn process(&self, text: &str, _context: &Context) -> Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AgentResponse::success(&self.name, format!("{}: {}", self.name, text)))
    }
}

/// Always returns an execution error
pub struct FailingAgent {
    name: String,
    capabilities: Vec<Capability>,
    pub calls: AtomicUsize,
}

impl FailingAgent {
    pub fn new(name: &str, capabilities: &[Capability]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            capabilities: capabilities.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn process(&self, _text: &str, _context: &Context) -> Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::agent_execution(&self.name, "upstream unavailable"))
    }
}

/// Sleeps for a fixed latency before echoing
pub struct SlowAgent {
    name: String,
    capabilities: Vec<Capability>,
    latency: Duration,
}

impl SlowAgent {
    pub fn new(name: &str, capabilities: &[Capability], latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            capabilities: capabilities.to_vec(),
            latency,
        })
    }
}

#[async_trait]
impl Agent for SlowAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn process(&self, text: &str, _context: &Context) -> Result<AgentResponse> {
        tokio::time::sleep(self.latency).await;
        Ok(AgentResponse::success(&self.name, format!("{} done: {}", self.name, text)))
    }
}

/// Fails the first `failures` calls, then succeeds
pub struct FlakyAgent {
    name: String,
    capabilities: Vec<Capability>,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyAgent {
    pub fn new(name: &str, capabilities: &[Capability], failures: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            capabilities: capabilities.to_vec(),
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FlakyAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn process(&self, _text: &str, _context: &Context) -> Result<AgentResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::agent_execution(&self.name, format!("flake {}", call + 1)));
        }
        Ok(AgentResponse::success(&self.name, "recovered"))
    }
}

/// Echoes and remembers every text and context it was given
pub struct RecordingAgent {
    name: String,
    capabilities: Vec<Capability>,
    pub seen: Mutex<Vec<(String, Context)>>,
}

impl RecordingAgent {
    pub fn new(name: &str, capabilities: &[Capability]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            capabilities: capabilities.to_vec(),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<(String, Context)> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn process(&self, text: &str, context: &Context) -> Result<AgentResponse> {
        self.seen.lock().push((text.to_string(), context.clone()));
        Ok(AgentResponse::success(&self.name, format!("{} saw {}", self.name, text)))
    }
}

/// Registry with every agent registered at priority 0, in order
pub fn registry_with(agents: Vec<Arc<dyn Agent>>) -> Arc<AgentRegistry> {
    let registry = Arc::new(AgentRegistry::new());
    for agent in agents {
        registry.register(agent, 0).unwrap();
    }
    registry
}

pub fn breakers() -> Arc<CircuitBreakerRegistry> {
    Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()))
}
