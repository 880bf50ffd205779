//! Scheduler termination properties, exercised directly against
//! `scheduler::execute_plan` with a hand-built plan — no Plan Builder
//! involved, so the exact number and shape of LLM calls stays small and
//! predictable.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use tool_orchestrator::llm::MockLlmGateway;
use tool_orchestrator::{ExecutionPlan, ExecutionStep, OrchestratorConfig, ToolArgs, ToolInvoker};

struct AlwaysFailsInvoker;

#[async_trait]
impl ToolInvoker for AlwaysFailsInvoker {
    async fn invoke(&self, _tool_name: &str, _args: &ToolArgs) -> Result<String, String> {
        Err("connection refused".to_string())
    }
}

fn not_solved_assessment() -> String {
    json!({
        "satisfaction_level": "不满足需求",
        "confidence": 0.4,
        "reason": "工具执行失败",
        "problem_solved": false,
        "need_more_tools": true,
        "tool_failed": true,
    })
    .to_string()
}

#[tokio::test]
async fn repeated_failure_of_a_single_step_terminates_within_iteration_cap() {
    // Plenty of headroom for whichever of the two consecutive-failure /
    // retry-cap rules fires first — the property under test is only that
    // the scheduler terminates at all, and well before `max_iterations`.
    let gateway = MockLlmGateway::new(vec![not_solved_assessment(); 10]);
    let invoker = AlwaysFailsInvoker;
    let config = OrchestratorConfig::default();

    let mut plan = ExecutionPlan::new("query that will never succeed");
    plan.add_step(ExecutionStep::new("s1", "flaky_tool", HashMap::new()));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let reason = tool_orchestrator::scheduler::execute_plan(
        &gateway, &invoker, &mut plan, &config, "query that will never succeed", &tx, None,
    )
    .await;

    assert!(
        matches!(
            reason,
            tool_orchestrator::scheduler::TerminationReason::ConsecutiveFailure
                | tool_orchestrator::scheduler::TerminationReason::RetryCapExceeded
        ),
        "expected a bounded failure termination, got {reason:?}"
    );
    assert!(gateway.call_count() <= config.max_tool_retries + 1);
}

#[tokio::test]
async fn parallel_batch_failure_gets_retried_same_as_a_singleton_step() {
    // Two steps sharing a parallel group, both backed by the
    // always-fails invoker: the batch arm of `execute_plan` must apply the
    // same retry-count/consecutive-failure bookkeeping a singleton failing
    // step gets, not silently leave a failed batch member stuck forever.
    let gateway = MockLlmGateway::new(vec![not_solved_assessment(); 10]);
    let invoker = AlwaysFailsInvoker;
    let config = OrchestratorConfig::default();

    let mut plan = ExecutionPlan::new("query that will never succeed");
    let mut s1 = ExecutionStep::new("s1", "flaky_tool", HashMap::new());
    s1.parallel_group = Some("g".to_string());
    let mut s2 = ExecutionStep::new("s2", "flaky_tool", HashMap::new());
    s2.parallel_group = Some("g".to_string());
    plan.add_step(s1);
    plan.add_step(s2);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let reason = tool_orchestrator::scheduler::execute_plan(
        &gateway, &invoker, &mut plan, &config, "query that will never succeed", &tx, None,
    )
    .await;

    assert!(
        matches!(
            reason,
            tool_orchestrator::scheduler::TerminationReason::ConsecutiveFailure
                | tool_orchestrator::scheduler::TerminationReason::RetryCapExceeded
        ),
        "expected a bounded failure termination, got {reason:?}"
    );
    // Each of the `max_tool_retries` iterations re-batches both steps
    // together (proof neither got stuck as permanently executed=true,
    // success=false) before the cap trips.
    assert!(plan.steps["s1"].success == Some(false));
    assert!(plan.steps["s2"].success == Some(false));
}

#[tokio::test]
async fn plan_with_no_steps_reports_completed_immediately() {
    let gateway = MockLlmGateway::new(vec![]);
    let invoker = AlwaysFailsInvoker;
    let config = OrchestratorConfig::default();
    let mut plan = ExecutionPlan::new("nothing to do");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let reason =
        tool_orchestrator::scheduler::execute_plan(&gateway, &invoker, &mut plan, &config, "nothing to do", &tx, None).await;

    assert_eq!(reason, tool_orchestrator::scheduler::TerminationReason::Completed);
    assert_eq!(gateway.call_count(), 0);
}
