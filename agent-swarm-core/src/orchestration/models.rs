//! Plan and result data models for orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::agent::{AgentResponse, Capability, Context};
use crate::{Error, Result};

/// Lifecycle status of a planned task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// How a plan's tasks are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    Sequential,
    Parallel,
    Conditional,
    /// Resolved to a concrete mode by the coordinator before execution
    Adaptive,
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowMode::Sequential => "sequential",
            WorkflowMode::Parallel => "parallel",
            WorkflowMode::Conditional => "conditional",
            WorkflowMode::Adaptive => "adaptive",
        };
        f.write_str(s)
    }
}

/// Condition evaluated against the run variables
pub type Predicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Builds a step's input text from the run variables
pub type InputTransform = Arc<dyn Fn(&Context) -> String + Send + Sync>;

/// Runtime-only behaviour attached to a task
///
/// Closures cannot be serialized, so these are dropped when a task goes
/// through serde and compared by identity.
#[derive(Clone, Default)]
pub struct StepOptions {
    /// When set and false, the step is skipped without calling its agent
    pub condition: Option<Predicate>,
    /// When set, replaces the step's default input text
    pub input_transform: Option<InputTransform>,
}

impl fmt::Debug for StepOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepOptions")
            .field("condition", &self.condition.is_some())
            .field("input_transform", &self.input_transform.is_some())
            .finish()
    }
}

impl PartialEq for StepOptions {
    fn eq(&self, other: &Self) -> bool {
        fn same<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }
        same(&self.condition, &other.condition)
            && same(&self.input_transform, &other.input_transform)
    }
}

/// A unit of work inside an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub capability: Option<Capability>,
    pub agent_name: String,
    pub dependencies: BTreeSet<String>,
    pub context: Context,
    pub status: TaskStatus,
    pub result: Option<AgentResponse>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Run variable that receives the output when the task completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(skip)]
    pub step: StepOptions,
}

impl Task {
    pub fn new<S1, S2, S3>(id: S1, description: S2, agent_name: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            id: id.into(),
            description: description.into(),
            capability: None,
            agent_name: agent_name.into(),
            dependencies: BTreeSet::new(),
            context: Context::new(),
            status: TaskStatus::Pending,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
            output_key: None,
            step: StepOptions::default(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn with_dependency<S: Into<String>>(mut self, task_id: S) -> Self {
        self.dependencies.insert(task_id.into());
        self
    }

    pub fn with_context<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_output_key<S: Into<String>>(mut self, key: S) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Only run the task when `condition` holds for the run variables
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.step.condition = Some(Arc::new(condition));
        self
    }

    /// Build the task's input text from the run variables
    pub fn with_input_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        self.step.input_transform = Some(Arc::new(transform));
        self
    }

    /// Pending -> Running
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)
    }

    /// Running -> Completed
    pub fn complete(&mut self, response: AgentResponse) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(response);
        Ok(())
    }

    /// Running -> Failed
    pub fn fail(&mut self, response: AgentResponse) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.result = Some(response);
        Ok(())
    }

    /// Pending or Running -> Skipped
    pub fn skip(&mut self) -> Result<()> {
        self.transition(TaskStatus::Skipped)
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Skipped)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Skipped)
        );
        if !allowed {
            return Err(Error::state_transition(format!(
                "Task {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Ordered tasks plus the mode chosen for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub tasks: Vec<Task>,
    pub mode: WorkflowMode,
    pub original_request: String,
    pub context: Context,
}

impl ExecutionPlan {
    pub fn new<S: Into<String>>(tasks: Vec<Task>, mode: WorkflowMode, request: S, context: Context) -> Self {
        Self {
            tasks,
            mode,
            original_request: request.into(),
            context,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Group task indices into dependency waves, see [`dependency_waves`]
    pub fn parallel_groups(&self) -> Vec<Vec<usize>> {
        dependency_waves(&self.tasks)
    }
}

/// Group task indices into dependency waves
///
/// Every task in a wave depends only on tasks in earlier waves. When no
/// remaining task is ready (a cycle, or a dependency naming no task in the
/// list) the first remaining task is forced into its own wave.
pub fn dependency_waves(tasks: &[Task]) -> Vec<Vec<usize>> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<usize> = (0..tasks.len()).collect();
    let mut groups = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<usize>, Vec<usize>) = remaining.iter().partition(|&&idx| {
            tasks[idx]
                .dependencies
                .iter()
                .all(|dep| ids.contains(dep.as_str()) && placed.contains(dep.as_str()))
        });

        let wave = if ready.is_empty() {
            vec![blocked[0]]
        } else {
            ready
        };
        remaining.retain(|idx| !wave.contains(idx));
        for &idx in &wave {
            placed.insert(tasks[idx].id.as_str());
        }
        groups.push(wave);
    }

    groups
}

/// Final outcome of one coordinator request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorResult {
    pub content: String,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub agents_used: Vec<String>,
    pub execution_time_ms: u64,
    pub metadata: HashMap<String, Value>,
}

impl CoordinatorResult {
    /// True when no task failed
    pub fn success(&self) -> bool {
        self.tasks_failed == 0
    }
}

/// Status of a workflow run
///
/// `Paused` and `Cancelled` are reserved; no executor path produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_task_lifecycle() {
        let mut task = Task::new("task_0", "search", "researcher")
            .with_capability(Capability::WebSearch);
        assert_eq!(task.status, TaskStatus::Pending);

        task.start().unwrap();
        task.complete(AgentResponse::success("researcher", "found"))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.result.as_ref().unwrap().content, "found");
    }

    #[test]
    fn test_task_rejects_backward_moves() {
        let mut task = Task::new("task_0", "write", "writer");
        assert_matches!(
            task.complete(AgentResponse::success("writer", "x")),
            Err(Error::StateTransition { .. })
        );

        task.start().unwrap();
        task.fail(AgentResponse::failure("writer", "Error: boom"))
            .unwrap();
        assert_matches!(task.start(), Err(Error::StateTransition { .. }));
        assert_matches!(task.skip(), Err(Error::StateTransition { .. }));
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn test_step_options_survive_clone_but_not_serde() {
        let task = Task::new("task_0", "write", "writer")
            .with_output_key("draft")
            .with_condition(|_| true)
            .with_input_transform(|_| "input".to_string());
        assert_eq!(task.clone(), task);

        let json = serde_json::to_string(&task).unwrap();
        let restored: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.output_key.as_deref(), Some("draft"));
        assert!(restored.step.condition.is_none());
        assert!(restored.step.input_transform.is_none());
        assert_ne!(restored, task);
    }

    #[test]
    fn test_parallel_groups_follow_dependencies() {
        let tasks = vec![
            Task::new("a", "", "x"),
            Task::new("b", "", "x").with_dependency("a"),
            Task::new("c", "", "x"),
            Task::new("d", "", "x").with_dependency("b").with_dependency("c"),
        ];
        let plan = ExecutionPlan::new(tasks, WorkflowMode::Parallel, "req", Context::new());

        assert_eq!(plan.parallel_groups(), vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn test_parallel_groups_break_cycles() {
        let tasks = vec![
            Task::new("a", "", "x").with_dependency("b"),
            Task::new("b", "", "x").with_dependency("a"),
            Task::new("c", "", "x").with_dependency("missing"),
        ];
        let plan = ExecutionPlan::new(tasks, WorkflowMode::Parallel, "req", Context::new());

        let groups = plan.parallel_groups();
        let flattened: Vec<usize> = groups.iter().flatten().copied().collect();
        assert_eq!(groups[0], vec![0]);
        assert_eq!(flattened.len(), 3);
    }

    #[test]
    fn test_coordinator_result_success() {
        let result = CoordinatorResult {
            content: "done".to_string(),
            tasks_completed: 2,
            tasks_failed: 0,
            agents_used: vec!["a".to_string()],
            execution_time_ms: 5,
            metadata: HashMap::new(),
        };
        assert!(result.success());
        assert!(!CoordinatorResult {
            tasks_failed: 1,
            ..result
        }
        .success());
    }
}
