//! Error types for queue operations

use thiserror::Error;

/// Queue layer error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Core domain error: {0}")]
    Core(#[from] agent_swarm_core::Error),

    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found<S1: Into<String>, S2: ToString>(entity: S1, id: S2) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Check if the failed operation may succeed when retried
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Core(e) => e.is_recoverable(),
            Error::Handler(_) => true,
            _ => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Core(e) => e.category(),
            Error::NotFound { .. } => "not_found",
            Error::Serialization(_) => "serialization",
            Error::Conflict(_) => "conflict",
            Error::Handler(_) => "handler",
            Error::Internal(_) => "internal",
        }
    }
}

/// Convenience result type for queue operations
pub type Result<T> = std::result::Result<T, Error>;
