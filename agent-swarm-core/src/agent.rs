//! Agent capability contract and response types
//!
//! An [`Agent`] is an opaque unit of work-performing capability. The
//! orchestration core never inspects an agent's internals; it only routes
//! text and a context map to [`Agent::process`] and reads back an
//! [`AgentResponse`].
//!
//! # Examples
//!
//! ```rust
//! use agent_swarm_core::agent::*;
//! use async_trait::async_trait;
//!
//! struct Shouter;
//!
//! #[async_trait]
//! impl Agent for Shouter {
//!     fn name(&self) -> &str {
//!         "shouter"
//!     }
//!
//!     fn capabilities(&self) -> &[Capability] {
//!         &[Capability::ContentWriting]
//!     }
//!
//!     async fn process(
//!         &self,
//!         text: &str,
//!         _context: &Context,
//!     ) -> agent_swarm_core::Result<AgentResponse> {
//!         Ok(AgentResponse::success(self.name(), text.to_uppercase()))
//!     }
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::Result;

/// Free-form context map handed to agents alongside the request text
pub type Context = HashMap<String, Value>;

/// Capabilities used to route a task to a suitable agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WebSearch,
    RagRetrieval,
    CodeGeneration,
    CodeAnalysis,
    ContentWriting,
    MemoryManagement,
    ImageGeneration,
    ApiIntegration,
    FileOperations,
    Conversation,
    FinancialAnalysis,
    Valuation,
}

impl Capability {
    /// Stable snake_case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::WebSearch => "web_search",
            Capability::RagRetrieval => "rag_retrieval",
            Capability::CodeGeneration => "code_generation",
            Capability::CodeAnalysis => "code_analysis",
            Capability::ContentWriting => "content_writing",
            Capability::MemoryManagement => "memory_management",
            Capability::ImageGeneration => "image_generation",
            Capability::ApiIntegration => "api_integration",
            Capability::FileOperations => "file_operations",
            Capability::Conversation => "conversation",
            Capability::FinancialAnalysis => "financial_analysis",
            Capability::Valuation => "valuation",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response produced by an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub agent_name: String,
    pub content: String,
    pub success: bool,
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<Value>,
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AgentResponse {
    /// Create a successful response with full confidence
    pub fn success<S1: Into<String>, S2: Into<String>>(agent_name: S1, content: S2) -> Self {
        Self {
            agent_name: agent_name.into(),
            content: content.into(),
            success: true,
            confidence: 1.0,
            reasoning: None,
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a failed response carrying an error description as content
    pub fn failure<S1: Into<String>, S2: Into<String>>(agent_name: S1, content: S2) -> Self {
        Self {
            success: false,
            confidence: 0.0,
            ..Self::success(agent_name, content)
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_reasoning<S: Into<String>>(mut self, reasoning: S) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_metadata<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A work-performing capability that the coordinator can route tasks to
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique agent name used for registry lookups and circuit breakers
    fn name(&self) -> &str;

    /// Capabilities this agent advertises
    fn capabilities(&self) -> &[Capability];

    fn description(&self) -> &str {
        ""
    }

    /// Check if the agent advertises a specific capability
    fn can_handle(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Process request text with the supplied context
    async fn process(&self, text: &str, context: &Context) -> Result<AgentResponse>;
}

impl fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Opaque text-completion collaborator used to merge several agent outputs
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, prompt: &str) -> Result<String>;
}
