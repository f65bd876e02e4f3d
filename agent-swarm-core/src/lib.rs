//! Core domain models and orchestration for Agent Swarm
//!
//! This crate contains the agent contract, the agent and circuit breaker
//! registries, and the workflow machinery that decomposes a request into
//! tasks, runs them against agents and synthesizes one answer.

pub mod agent;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod orchestration;
pub mod registry;
pub mod telemetry;

pub use agent::{Agent, AgentResponse, Capability, Context, Synthesizer};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use error::{CircuitOpenError, Error, Result};
pub use registry::AgentRegistry;
