//! Error types for the orchestration core

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Raised when a circuit breaker refuses a call
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Circuit '{name}' is open until {}", .retry_after.to_rfc3339())]
pub struct CircuitOpenError {
    /// Name of the protected resource
    pub name: String,
    /// Earliest time a new call may be attempted
    pub retry_after: DateTime<Utc>,
}

/// Core error type for orchestration operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Agent not found: {name}")]
    AgentNotFound { name: String },

    #[error("Agent already registered: {name}")]
    AlreadyRegistered { name: String },

    #[error("Agent '{agent}' failed: {message}")]
    AgentExecution { agent: String, message: String },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("State transition error: {message}")]
    StateTransition { message: String },

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation timeout: {operation} exceeded {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::configuration(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl Error {
    /// Create a validation error with a formatted message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an agent-not-found error
    pub fn agent_not_found<S: Into<String>>(name: S) -> Self {
        Self::AgentNotFound { name: name.into() }
    }

    /// Create an execution error attributed to an agent
    pub fn agent_execution<S1: Into<String>, S2: Into<String>>(agent: S1, message: S2) -> Self {
        Self::AgentExecution {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a state transition error
    pub fn state_transition<S: Into<String>>(message: S) -> Self {
        Self::StateTransition {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Check if this error is a circuit breaker block
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen(_))
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::AgentNotFound { .. })
    }

    /// Check if this error is recoverable (caller can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::CircuitOpen(_) | Error::AgentExecution { .. }
        )
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::AgentNotFound { .. } => "agent_not_found",
            Error::AlreadyRegistered { .. } => "already_registered",
            Error::AgentExecution { .. } => "agent_execution",
            Error::CircuitOpen(_) => "circuit_open",
            Error::StateTransition { .. } => "state_transition",
            Error::Synthesis(_) => "synthesis",
            Error::Configuration { .. } => "configuration",
            Error::Serialization(_) => "serialization",
            Error::Timeout { .. } => "timeout",
            Error::Internal(_) => "internal",
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
