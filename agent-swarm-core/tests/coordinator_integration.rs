//! End-to-end tests of request planning and execution through the coordinator

mod common;

use agent_swarm_core::config::WorkflowConfig;
use agent_swarm_core::orchestration::coordinator::NO_RESULT_MESSAGE;
use agent_swarm_core::orchestration::{
    Branch, ConditionalRouting, Coordinator, Task, WorkflowMode,
};
use agent_swarm_core::{
    Agent, Capability, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, Context,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{
    breakers, registry_with, EchoAgent, FailingAgent, FlakyAgent, RecordingAgent, SlowAgent,
};

#[tokio::test]
async fn test_research_then_write_runs_sequentially() {
    let researcher = RecordingAgent::new("researcher", &[Capability::WebSearch]);
    let writer = RecordingAgent::new("writer", &[Capability::ContentWriting]);
    let registry = registry_with(vec![
        researcher.clone() as Arc<dyn Agent>,
        writer.clone() as Arc<dyn Agent>,
    ]);
    let coordinator = Coordinator::new(registry, breakers(), WorkflowConfig::default());

    let request = "Research quantum computing and then write a blog post about it";
    let plan = coordinator.create_plan(request, Context::new(), WorkflowMode::Adaptive);
    assert_eq!(plan.mode, WorkflowMode::Sequential);
    assert_eq!(plan.len(), 2);

    let result = coordinator
        .execute(request, Context::new(), WorkflowMode::Adaptive)
        .await;

    assert_eq!(result.tasks_completed, 2);
    assert_eq!(result.tasks_failed, 0);
    assert!(result.success());
    assert_eq!(result.agents_used, vec!["researcher", "writer"]);
    assert_eq!(result.metadata["workflow_mode"], json!("sequential"));
    assert!(result.content.contains("--- researcher ---"));
    assert!(result.content.contains("--- writer ---"));

    let (_, writer_context) = writer.seen()[0].clone();
    assert_eq!(
        writer_context["previous_response"],
        json!(format!("researcher saw {}", request))
    );
}

#[tokio::test]
async fn test_request_without_keywords_uses_first_agent() {
    let chat = EchoAgent::new("chat", &[Capability::Conversation]);
    let registry = registry_with(vec![chat.clone() as Arc<dyn Agent>]);
    let coordinator = Coordinator::new(registry, breakers(), WorkflowConfig::default());

    let result = coordinator
        .execute("How are you today?", Context::new(), WorkflowMode::Adaptive)
        .await;

    assert_eq!(result.tasks_completed, 1);
    assert_eq!(result.content, "chat: How are you today?");
    assert_eq!(result.metadata["plan_tasks"], json!(1));
    assert_eq!(chat.call_count(), 1);
}

#[tokio::test]
async fn test_empty_registry_returns_apology() {
    let coordinator = Coordinator::new(registry_with(vec![]), breakers(), WorkflowConfig::default());
    let reply = coordinator.chat("write something").await;
    assert_eq!(reply, NO_RESULT_MESSAGE);
}

#[tokio::test]
async fn test_open_circuit_stops_calling_agent() {
    let coder = FailingAgent::new("coder", &[Capability::CodeGeneration]);
    let registry = registry_with(vec![coder.clone() as Arc<dyn Agent>]);
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 2,
        ..Default::default()
    }));
    let coordinator = Coordinator::new(registry, Arc::clone(&breakers), WorkflowConfig::default());

    for _ in 0..2 {
        let result = coordinator
            .execute("implement a parser", Context::new(), WorkflowMode::Adaptive)
            .await;
        assert_eq!(result.tasks_failed, 1);
    }

    let blocked = coordinator
        .execute("implement a parser", Context::new(), WorkflowMode::Adaptive)
        .await;
    assert_eq!(blocked.tasks_failed, 1);
    assert_eq!(blocked.content, NO_RESULT_MESSAGE);
    assert_eq!(coder.call_count(), 2);

    let breaker = breakers.get("coder").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_latency_is_not_additive() {
    let latency = Duration::from_millis(200);
    let registry = registry_with(vec![
        SlowAgent::new("searcher", &[Capability::WebSearch], latency) as Arc<dyn Agent>,
        SlowAgent::new("writer", &[Capability::ContentWriting], latency) as Arc<dyn Agent>,
    ]);
    let coordinator = Coordinator::new(registry, breakers(), WorkflowConfig::default());

    let request = "search for rust news and write a summary";
    let started = tokio::time::Instant::now();
    let result = coordinator
        .execute(request, Context::new(), WorkflowMode::Adaptive)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result.metadata["workflow_mode"], json!("parallel"));
    assert_eq!(result.tasks_completed, 2);
    assert!(elapsed >= latency);
    assert!(elapsed < latency * 2, "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_agent_recovers_with_retries() {
    let flaky = FlakyAgent::new("writer", &[Capability::ContentWriting], 2);
    let registry = registry_with(vec![flaky.clone() as Arc<dyn Agent>]);
    let config = WorkflowConfig::default()
        .with_max_retries(2)
        .with_retry_base_delay(Duration::from_millis(10));
    let coordinator = Coordinator::new(registry, breakers(), config);

    let result = coordinator
        .execute("draft an article", Context::new(), WorkflowMode::Sequential)
        .await;

    assert_eq!(result.tasks_completed, 1);
    assert_eq!(result.content, "recovered");
    assert_eq!(flaky.call_count(), 3);
}

#[tokio::test]
async fn test_conditional_routing_chains_branch_steps() {
    let triage = EchoAgent::new("triage", &[Capability::CodeAnalysis]);
    let writer = EchoAgent::new("writer", &[Capability::ContentWriting]);
    let registry = registry_with(vec![
        triage as Arc<dyn Agent>,
        writer as Arc<dyn Agent>,
    ]);

    let routing = ConditionalRouting::new()
        .branch(Branch::new(
            "bug_report",
            |vars: &Context| {
                vars.get("input")
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| s.contains("crash"))
            },
            vec![
                Task::new("triage", "triage the report", "triage"),
                Task::new("summary", "summarize the triage", "writer"),
            ],
        ))
        .fallback(vec![Task::new("reply", "reply", "writer")]);

    let coordinator = Coordinator::new(registry, breakers(), WorkflowConfig::default())
        .with_routing(routing);

    let result = coordinator
        .execute("the app crash on start", Context::new(), WorkflowMode::Conditional)
        .await;

    assert_eq!(result.metadata["branch"], json!("bug_report"));
    assert_eq!(result.tasks_completed, 2);
    assert_eq!(result.content, "writer: triage: the app crash on start");

    let fallback = coordinator
        .execute("hello", Context::new(), WorkflowMode::Conditional)
        .await;
    assert_eq!(fallback.metadata["branch"], json!("fallback"));
    assert_eq!(fallback.content, "writer: hello");
}

#[tokio::test]
async fn test_disabled_agent_skips_its_task() {
    let researcher = EchoAgent::new("researcher", &[Capability::WebSearch]);
    let writer = EchoAgent::new("writer", &[Capability::ContentWriting]);
    let registry = registry_with(vec![
        researcher as Arc<dyn Agent>,
        writer.clone() as Arc<dyn Agent>,
    ]);
    let coordinator = Coordinator::new(Arc::clone(&registry), breakers(), WorkflowConfig::default());

    let request = "research rust and then write a summary";
    let mut plan = coordinator.create_plan(request, Context::new(), WorkflowMode::Adaptive);
    assert_eq!(plan.len(), 2);

    registry.disable("writer").unwrap();
    let strategy = agent_swarm_core::orchestration::Strategy::Sequential;
    let outcome = coordinator.executor().execute_plan(&strategy, &mut plan).await;

    assert_eq!(outcome.responses.len(), 1);
    assert_eq!(writer.call_count(), 0);
    assert_eq!(
        plan.count_by_status(agent_swarm_core::orchestration::TaskStatus::Skipped),
        1
    );
}
