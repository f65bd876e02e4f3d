//! Request planning, execution and synthesis
//!
//! The [`Coordinator`] turns a free-text request into an [`ExecutionPlan`]
//! by scanning it for capability keywords, runs the plan through a
//! [`WorkflowExecutor`] and merges the successful responses into one answer.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{AgentResponse, Capability, Context, Synthesizer};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::{OrchestratorConfig, WorkflowConfig};
use crate::orchestration::models::{
    CoordinatorResult, ExecutionPlan, Task, TaskStatus, WorkflowMode,
};
use crate::orchestration::workflow::{Aggregator, ConditionalRouting, Strategy, WorkflowExecutor};
use crate::registry::AgentRegistry;

/// Capability keyword table, scanned in this order
///
/// Phrases overlap between entries (`"remember"` and `"remember this"`), so
/// the order here is the priority in which detected capabilities become
/// plan tasks.
pub const CAPABILITY_KEYWORDS: &[(Capability, &[&str])] = &[
    (
        Capability::WebSearch,
        &["search", "find", "look up", "research"],
    ),
    (
        Capability::RagRetrieval,
        &["remember", "recall", "knowledge", "what did"],
    ),
    (
        Capability::CodeGeneration,
        &["code", "program", "function", "script", "implement"],
    ),
    (
        Capability::CodeAnalysis,
        &["debug", "analyze", "review code"],
    ),
    (
        Capability::ContentWriting,
        &["write", "blog", "tweet", "article", "summary", "draft"],
    ),
    (
        Capability::MemoryManagement,
        &["store", "save", "remember this"],
    ),
];

/// Phrases implying that later steps depend on earlier ones
pub const DEPENDENCY_INDICATORS: &[&str] = &[
    "then", "after", "first", "finally", "next", "and then", "once you", "based on",
];

pub const NO_RESULT_MESSAGE: &str = "I couldn't complete the request. Please try again.";

const SYNTHESIS_TRAILER: &str = "Synthesized response:";

/// Capabilities whose keywords occur in `request`, in table order
pub fn detect_capabilities(request: &str) -> Vec<Capability> {
    let lowered = request.to_lowercase();
    CAPABILITY_KEYWORDS
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|p| lowered.contains(p)))
        .map(|(capability, _)| *capability)
        .collect()
}

/// True if `request` contains a dependency indicator
pub fn has_dependencies(request: &str) -> bool {
    let lowered = request.to_lowercase();
    DEPENDENCY_INDICATORS.iter().any(|ind| lowered.contains(ind))
}

/// Build the prompt handed to the synthesizer
pub fn synthesis_prompt(request: &str, responses: &[AgentResponse]) -> String {
    let mut prompt = format!(
        "Original request: {}\n\nCombine these responses coherently:\n\n",
        request
    );
    prompt.push_str(&response_blocks(responses));
    prompt.push_str(SYNTHESIS_TRAILER);
    prompt
}

fn response_blocks(responses: &[AgentResponse]) -> String {
    responses
        .iter()
        .map(|r| format!("--- {} ---\n{}\n\n", r.agent_name, r.content))
        .collect()
}

/// Plans, executes and synthesizes multi-agent requests
pub struct Coordinator {
    registry: Arc<AgentRegistry>,
    executor: WorkflowExecutor,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    routing: Option<ConditionalRouting>,
    aggregator: Option<Aggregator>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        config: WorkflowConfig,
    ) -> Self {
        let executor = WorkflowExecutor::new(Arc::clone(&registry), breakers, config);
        Self {
            registry,
            executor,
            synthesizer: None,
            routing: None,
            aggregator: None,
        }
    }

    /// Coordinator with a fresh breaker registry built from `config`
    pub fn from_config(registry: Arc<AgentRegistry>, config: &OrchestratorConfig) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        Self::new(registry, breakers, config.workflow.clone())
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Branches used when a request runs in conditional mode
    pub fn with_routing(mut self, routing: ConditionalRouting) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Custom merge for parallel runs, reported in the workflow output
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        self.executor.breakers()
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// Build the execution plan for a request
    ///
    /// Tasks are numbered `task_0`, `task_1`, ... in the order their
    /// capabilities were detected. A detected capability with no enabled
    /// agent produces no task. With no task at all, the first registered
    /// agent handles the whole request.
    pub fn create_plan(&self, request: &str, context: Context, mode: WorkflowMode) -> ExecutionPlan {
        let mut tasks = Vec::new();

        for capability in detect_capabilities(request) {
            match self.registry.get_best_for_capability(capability) {
                Some(agent) => {
                    let id = format!("task_{}", tasks.len());
                    tasks.push(Task::new(id, request, agent.name()).with_capability(capability));
                }
                None => debug!("No agent available for {}", capability),
            }
        }

        if tasks.is_empty() {
            if let Some(agent) = self.registry.list_all().first() {
                tasks.push(Task::new("task_0", request, agent.name()));
            }
        }

        let effective_mode = match mode {
            WorkflowMode::Adaptive if tasks.len() > 1 && has_dependencies(request) => {
                WorkflowMode::Sequential
            }
            WorkflowMode::Adaptive if tasks.len() > 1 => WorkflowMode::Parallel,
            WorkflowMode::Adaptive => WorkflowMode::Sequential,
            other => other,
        };

        debug!(
            "Planned {} tasks in {} mode: {:?}",
            tasks.len(),
            effective_mode,
            tasks.iter().map(|t| &t.agent_name).collect::<Vec<_>>()
        );

        ExecutionPlan::new(tasks, effective_mode, request, context)
    }

    /// Execute a request end to end
    ///
    /// Task failures never escape; they are counted in the result.
    pub async fn execute(&self, request: &str, context: Context, mode: WorkflowMode) -> CoordinatorResult {
        let start = Instant::now();
        let mut plan = self.create_plan(request, context, mode);
        let strategy = self.strategy_for(plan.mode);

        let workflow = self.executor.execute_plan(&strategy, &mut plan).await;

        let successful: Vec<AgentResponse> = workflow
            .responses
            .iter()
            .filter(|r| r.success)
            .cloned()
            .collect();

        let content = match (&strategy, successful.is_empty()) {
            (_, true) => NO_RESULT_MESSAGE.to_string(),
            (Strategy::Conditional(_), false) => workflow.output.clone(),
            _ => self.synthesize(request, &successful).await,
        };

        let mut agents_used: Vec<String> = Vec::new();
        for response in &workflow.responses {
            if !agents_used.contains(&response.agent_name) {
                agents_used.push(response.agent_name.clone());
            }
        }

        let tasks_completed = plan.count_by_status(TaskStatus::Completed);
        let tasks_failed = plan.count_by_status(TaskStatus::Failed);
        let tasks_skipped = plan.count_by_status(TaskStatus::Skipped);

        let mut metadata: HashMap<String, Value> = HashMap::new();
        metadata.insert("plan_tasks".to_string(), json!(plan.len()));
        metadata.insert("workflow_mode".to_string(), json!(plan.mode.to_string()));
        metadata.insert("tasks_skipped".to_string(), json!(tasks_skipped));
        if let Some(branch) = &workflow.branch {
            metadata.insert("branch".to_string(), json!(branch));
        }

        let execution_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Request finished in {}ms: {} completed, {} failed, {} skipped",
            execution_time_ms, tasks_completed, tasks_failed, tasks_skipped
        );

        CoordinatorResult {
            content,
            tasks_completed,
            tasks_failed,
            agents_used,
            execution_time_ms,
            metadata,
        }
    }

    /// Execute in adaptive mode and return only the content
    pub async fn chat(&self, message: &str) -> String {
        self.execute(message, Context::new(), WorkflowMode::Adaptive)
            .await
            .content
    }

    fn strategy_for(&self, mode: WorkflowMode) -> Strategy {
        match mode {
            WorkflowMode::Parallel => Strategy::Parallel {
                aggregator: self.aggregator.clone(),
            },
            WorkflowMode::Conditional => match &self.routing {
                Some(routing) => Strategy::Conditional(routing.clone()),
                None => {
                    warn!("Conditional mode requested without routing; running sequentially");
                    Strategy::Sequential
                }
            },
            WorkflowMode::Sequential | WorkflowMode::Adaptive => Strategy::Sequential,
        }
    }

    async fn synthesize(&self, request: &str, successful: &[AgentResponse]) -> String {
        if let [only] = successful {
            return only.content.clone();
        }

        let Some(synthesizer) = &self.synthesizer else {
            debug!("No synthesizer configured; concatenating {} responses", successful.len());
            return response_blocks(successful).trim().to_string();
        };

        let prompt = synthesis_prompt(request, successful);
        match synthesizer.synthesize(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Synthesis failed, concatenating responses: {}", e);
                response_blocks(successful).trim().to_string()
            }
        }
    }
}
