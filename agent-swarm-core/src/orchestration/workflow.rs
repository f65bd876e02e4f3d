//! Workflow execution strategies
//!
//! The [`WorkflowExecutor`] runs the tasks of a plan against registered
//! agents using one of three strategies:
//!
//! - **Sequential**: tasks run in plan order, each seeing the responses of
//!   the tasks before it through its context.
//! - **Parallel**: tasks run concurrently in dependency waves, each against
//!   an independent snapshot of the shared context.
//! - **Conditional**: the first branch whose predicate matches runs as a
//!   chain where every step consumes the previous step's output.
//!
//! Every agent call goes through that agent's circuit breaker. Individual
//! task failures are recorded on the task and never abort the run.
//!
//! A task may carry a condition (false skips it), an input transform that
//! builds its input text from the run variables, and an output key naming
//! the variable that receives its output. Before and after step hooks
//! registered on the executor see every step that is not skipped.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentResponse, Context};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::WorkflowConfig;
pub use crate::orchestration::models::Predicate;
use crate::orchestration::models::{
    dependency_waves, ExecutionPlan, Task, TaskStatus, WorkflowStatus,
};
use crate::registry::AgentRegistry;

/// Merges the successful responses of a parallel run into one output
pub type Aggregator = Arc<dyn Fn(&[AgentResponse]) -> String + Send + Sync>;

/// Called with the task and its step context before the agent runs
pub type BeforeStepHook = Arc<dyn Fn(&Task, &Context) + Send + Sync>;

/// Called with the finished task, the run variables and its response
///
/// The response is `None` when the task's agent is not registered.
pub type AfterStepHook = Arc<dyn Fn(&Task, &Context, Option<&AgentResponse>) + Send + Sync>;

/// One candidate branch of a conditional workflow
#[derive(Clone)]
pub struct Branch {
    pub name: String,
    pub predicate: Predicate,
    pub tasks: Vec<Task>,
}

impl Branch {
    pub fn new<S, F>(name: S, predicate: F, tasks: Vec<Task>) -> Self
    where
        S: Into<String>,
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            tasks,
        }
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

/// Ordered branches plus the steps to run when none matches
#[derive(Debug, Clone, Default)]
pub struct ConditionalRouting {
    pub branches: Vec<Branch>,
    pub fallback: Vec<Task>,
}

impl ConditionalRouting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn fallback(mut self, tasks: Vec<Task>) -> Self {
        self.fallback = tasks;
        self
    }
}

/// Execution strategy for one workflow run
#[derive(Clone)]
pub enum Strategy {
    Sequential,
    Parallel { aggregator: Option<Aggregator> },
    Conditional(ConditionalRouting),
}

impl Strategy {
    pub fn parallel() -> Self {
        Strategy::Parallel { aggregator: None }
    }
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "Sequential"),
            Strategy::Parallel { aggregator } => f
                .debug_struct("Parallel")
                .field("custom_aggregator", &aggregator.is_some())
                .finish(),
            Strategy::Conditional(routing) => f.debug_tuple("Conditional").field(routing).finish(),
        }
    }
}

/// Live record of a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub status: WorkflowStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub variables: Context,
    pub responses: Vec<AgentResponse>,
}

impl WorkflowRun {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: WorkflowStatus::NotStarted,
            started_at: None,
            completed_at: None,
            error: None,
            variables: Context::new(),
            responses: Vec::new(),
        }
    }
}

/// Outcome of a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub output: String,
    pub responses: Vec<AgentResponse>,
    pub variables: Context,
    /// Name of the conditional branch that ran, if any
    pub branch: Option<String>,
    pub steps_completed: usize,
    pub execution_time_ms: u64,
}

impl WorkflowResult {
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

/// Default parallel aggregation
///
/// A single response is returned verbatim; several are rendered as
/// `## <agent>` sections separated by blank lines.
pub fn default_aggregate(responses: &[AgentResponse]) -> String {
    match responses {
        [] => String::new(),
        [only] => only.content.clone(),
        many => many
            .iter()
            .map(|r| format!("## {}\n{}", r.agent_name, r.content))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

/// Runs plan tasks against agents under a chosen strategy
pub struct WorkflowExecutor {
    registry: Arc<AgentRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    config: WorkflowConfig,
    active_runs: Arc<RwLock<HashMap<Uuid, WorkflowRun>>>,
    before_step: Vec<BeforeStepHook>,
    after_step: Vec<AfterStepHook>,
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            config,
            active_runs: Arc::new(RwLock::new(HashMap::new())),
            before_step: Vec::new(),
            after_step: Vec::new(),
        }
    }

    pub fn with_before_step_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Task, &Context) + Send + Sync + 'static,
    {
        self.before_step.push(Arc::new(hook));
        self
    }

    pub fn with_after_step_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Task, &Context, Option<&AgentResponse>) + Send + Sync + 'static,
    {
        self.after_step.push(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Snapshot of the runs currently executing
    pub async fn active_runs(&self) -> Vec<WorkflowRun> {
        self.active_runs.read().await.values().cloned().collect()
    }

    /// Execute a plan's tasks in place with the given strategy
    pub async fn execute_plan(&self, strategy: &Strategy, plan: &mut ExecutionPlan) -> WorkflowResult {
        let input = plan.original_request.clone();
        let context = plan.context.clone();
        self.execute(strategy, &mut plan.tasks, &input, &context).await
    }

    /// Execute `tasks` with the given strategy
    ///
    /// Task statuses and results are updated in place. For a conditional
    /// strategy the selected branch replaces `tasks`; when no branch matches
    /// and the fallback is empty, the original tasks run as the chain.
    pub async fn execute(
        &self,
        strategy: &Strategy,
        tasks: &mut Vec<Task>,
        input: &str,
        context: &Context,
    ) -> WorkflowResult {
        let start = Instant::now();
        let mut run = WorkflowRun::new();
        run.status = WorkflowStatus::Running;
        run.started_at = Some(Utc::now());
        run.variables = context.clone();
        let run_id = run.id;
        self.active_runs.write().await.insert(run_id, run.clone());

        info!(
            "Starting workflow run {} with {} tasks ({:?})",
            run_id,
            tasks.len(),
            strategy
        );

        let (output, branch) = match strategy {
            Strategy::Sequential => {
                let output = self.run_sequential(tasks, &mut run).await;
                (output, None)
            }
            Strategy::Parallel { aggregator } => {
                let output = self
                    .run_parallel(tasks, &mut run, aggregator.as_ref())
                    .await;
                (output, None)
            }
            Strategy::Conditional(routing) => {
                let (output, branch) = self.run_conditional(routing, tasks, input, &mut run).await;
                (output, Some(branch))
            }
        };

        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let failed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();

        run.status = if failed > 0 && completed == 0 {
            run.error = Some(format!("All {} executed tasks failed", failed));
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        run.completed_at = Some(Utc::now());
        self.active_runs.write().await.remove(&run_id);

        let execution_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Workflow run {} finished: {:?} ({} completed, {} failed) in {}ms",
            run_id, run.status, completed, failed, execution_time_ms
        );

        WorkflowResult {
            run_id,
            status: run.status,
            output,
            responses: run.responses,
            variables: run.variables,
            branch,
            steps_completed: completed,
            execution_time_ms,
        }
    }

    async fn run_sequential(&self, tasks: &mut [Task], run: &mut WorkflowRun) -> String {
        let mut output = String::new();

        for task in tasks.iter_mut() {
            let mut step_context = run.variables.clone();
            step_context.extend(task.context.clone());
            if !self.should_run(task, &step_context) {
                continue;
            }

            self.before_hooks(task, &step_context);
            let text = step_input(task, &step_context, &task.description);
            let response = self.run_task(task, &text, &step_context).await;

            if let Some(response) = &response {
                run.variables.insert(
                    "previous_response".to_string(),
                    Value::String(response.content.clone()),
                );
                if task.status == TaskStatus::Completed {
                    run.variables.insert(
                        format!("response_{}", task.id),
                        Value::String(response.content.clone()),
                    );
                    store_output(task, &mut run.variables);
                    output = response.content.clone();
                }
            }
            self.after_hooks(task, &run.variables, response.as_ref());
            run.responses.extend(response);
        }

        output
    }

    async fn run_parallel(
        &self,
        tasks: &mut [Task],
        run: &mut WorkflowRun,
        aggregator: Option<&Aggregator>,
    ) -> String {
        let waves = dependency_waves(tasks);
        let semaphore = self.config.max_parallel.map(|n| Arc::new(Semaphore::new(n)));

        for (wave_index, wave) in waves.iter().enumerate() {
            debug!("Running parallel wave {} with {} tasks", wave_index, wave.len());

            let futures = tasks
                .iter_mut()
                .enumerate()
                .filter(|(idx, _)| wave.contains(idx))
                .map(|(_, task)| {
                    let mut snapshot = run.variables.clone();
                    snapshot.extend(task.context.clone());
                    let semaphore = semaphore.clone();
                    async move {
                        if !self.should_run(task, &snapshot) {
                            return None;
                        }
                        let _permit = match &semaphore {
                            Some(limit) => limit.acquire().await.ok(),
                            None => None,
                        };
                        self.before_hooks(task, &snapshot);
                        let text = step_input(task, &snapshot, &task.description);
                        let response = self.run_task(task, &text, &snapshot).await;
                        Some((&*task, response))
                    }
                });

            let finished: Vec<(&Task, Option<AgentResponse>)> =
                join_all(futures).await.into_iter().flatten().collect();
            // later waves see the outputs of earlier ones
            for (task, _) in &finished {
                if task.status == TaskStatus::Completed {
                    store_output(task, &mut run.variables);
                }
            }
            for (task, response) in finished {
                self.after_hooks(task, &run.variables, response.as_ref());
                run.responses.extend(response);
            }
        }

        let successful: Vec<AgentResponse> = run
            .responses
            .iter()
            .filter(|r| r.success)
            .cloned()
            .collect();

        match aggregator {
            Some(aggregate) => aggregate(&successful),
            None => default_aggregate(&successful),
        }
    }

    async fn run_conditional(
        &self,
        routing: &ConditionalRouting,
        tasks: &mut Vec<Task>,
        input: &str,
        run: &mut WorkflowRun,
    ) -> (String, String) {
        run.variables
            .insert("input".to_string(), Value::String(input.to_string()));

        let selected = routing.branches.iter().find(|branch| {
            let variables = &run.variables;
            std::panic::catch_unwind(AssertUnwindSafe(|| (branch.predicate)(variables)))
                .unwrap_or_else(|_| {
                    warn!("Predicate for branch {} panicked; treating as false", branch.name);
                    false
                })
        });

        let branch_name = match selected {
            Some(branch) => {
                *tasks = branch.tasks.clone();
                branch.name.clone()
            }
            None => {
                if !routing.fallback.is_empty() {
                    *tasks = routing.fallback.clone();
                }
                "fallback".to_string()
            }
        };
        debug!("Conditional workflow selected branch {}", branch_name);
        run.variables
            .insert("branch".to_string(), Value::String(branch_name.clone()));

        let mut current = input.to_string();
        for task in tasks.iter_mut() {
            let mut step_context = run.variables.clone();
            step_context.extend(task.context.clone());
            if !self.should_run(task, &step_context) {
                continue;
            }

            self.before_hooks(task, &step_context);
            let text = step_input(task, &step_context, &current);
            let response = self.run_task(task, &text, &step_context).await;

            if let Some(response) = &response {
                run.variables.insert(
                    "previous_response".to_string(),
                    Value::String(response.content.clone()),
                );
                if task.status == TaskStatus::Completed {
                    store_output(task, &mut run.variables);
                    current = response.content.clone();
                }
            }
            self.after_hooks(task, &run.variables, response.as_ref());
            run.responses.extend(response);
        }

        (current, branch_name)
    }

    /// Evaluate the task's condition, skipping the task when it is false
    ///
    /// A panicking condition counts as false.
    fn should_run(&self, task: &mut Task, context: &Context) -> bool {
        let Some(condition) = task.step.condition.clone() else {
            return true;
        };
        let holds = std::panic::catch_unwind(AssertUnwindSafe(|| condition(context)))
            .unwrap_or_else(|_| {
                warn!("Condition for task {} panicked; treating as false", task.id);
                false
            });
        if !holds && task.status == TaskStatus::Pending {
            debug!("Condition for task {} is false; skipping", task.id);
            if let Err(e) = task.skip() {
                warn!("{}", e);
            }
        }
        holds
    }

    fn before_hooks(&self, task: &Task, context: &Context) {
        for hook in &self.before_step {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(task, context))).is_err() {
                warn!("Before-step hook panicked on task {}", task.id);
            }
        }
    }

    fn after_hooks(&self, task: &Task, variables: &Context, response: Option<&AgentResponse>) {
        for hook in &self.after_step {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(task, variables, response))).is_err() {
                warn!("After-step hook panicked on task {}", task.id);
            }
        }
    }

    /// Run one task to a terminal status
    ///
    /// Returns `None` when the task was skipped because its agent is not
    /// registered.
    async fn run_task(&self, task: &mut Task, text: &str, context: &Context) -> Option<AgentResponse> {
        if task.status != TaskStatus::Pending {
            debug!("Task {} already {}, not re-running", task.id, task.status);
            return task.result.clone();
        }

        let Some(agent) = self.registry.get(&task.agent_name) else {
            warn!("Agent {} not found; skipping task {}", task.agent_name, task.id);
            if let Err(e) = task.skip() {
                warn!("{}", e);
            }
            return None;
        };

        if let Err(e) = task.start() {
            warn!("{}", e);
            return None;
        }

        let breaker = self.breakers.get_or_create(agent.name());
        let mut last_failure = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_base_delay() * attempt;
                debug!(
                    "Retrying task {} (attempt {}/{}) after {:?}",
                    task.id, attempt, self.config.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }

            if let Err(blocked) = breaker.allow_request() {
                warn!("Task {} blocked: {}", task.id, blocked);
                last_failure = Some(
                    AgentResponse::failure(agent.name(), format!("Error: {}", blocked))
                        .with_metadata("circuit_open", json!(true))
                        .with_metadata("retry_after", json!(blocked.retry_after.to_rfc3339())),
                );
                break;
            }

            let outcome = AssertUnwindSafe(agent.process(text, context))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(response)) if response.success => {
                    breaker.record_success();
                    if let Err(e) = task.complete(response.clone()) {
                        warn!("{}", e);
                    }
                    return Some(response);
                }
                Ok(Ok(response)) => {
                    breaker.record_failure(Some(&response.content));
                    last_failure = Some(response);
                }
                Ok(Err(e)) => {
                    breaker.record_failure(Some(&e.to_string()));
                    last_failure = Some(AgentResponse::failure(
                        agent.name(),
                        format!("Error: {}", e),
                    ));
                }
                Err(_) => {
                    breaker.record_failure(Some("agent panicked"));
                    last_failure = Some(AgentResponse::failure(
                        agent.name(),
                        "Error: agent panicked while processing",
                    ));
                }
            }
        }

        let response = last_failure
            .unwrap_or_else(|| AgentResponse::failure(agent.name(), "Error: task did not run"));
        warn!("Task {} failed: {}", task.id, response.content);
        if let Err(e) = task.fail(response.clone()) {
            warn!("{}", e);
        }
        Some(response)
    }
}

/// Input text for a step: its transform's output, or `default`
fn step_input(task: &Task, context: &Context, default: &str) -> String {
    match &task.step.input_transform {
        Some(transform) => std::panic::catch_unwind(AssertUnwindSafe(|| transform(context)))
            .unwrap_or_else(|_| {
                warn!("Input transform for task {} panicked; using default input", task.id);
                default.to_string()
            }),
        None => default.to_string(),
    }
}

fn store_output(task: &Task, variables: &mut Context) {
    if let (Some(key), Some(response)) = (&task.output_key, &task.result) {
        variables.insert(key.clone(), Value::String(response.content.clone()));
    }
}
