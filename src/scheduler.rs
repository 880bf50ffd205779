//! Plan Scheduler (§4.4): drives an `ExecutionPlan` to completion, batch by
//! batch, emitting progress records as it goes.
//!
//! This crate's Plan Builder always emits the full DAG up front, so the
//! scheduler runs in the degenerate mode §4.4 describes for that case:
//! `executed_tools`/cursor bookkeeping collapses into repeatedly pulling
//! `plan.parallel_ready_groups()` until none remain. Per-step retry still
//! follows the pair-keyed `workflow_repeat_count` cap and the
//! two-consecutive-failure rule — rollback here means retrying the same
//! failed step (its dependencies already succeeded, so there is no earlier
//! step to roll back to) rather than rewinding a flat cursor.

use crate::assessor::{assess_final_state, assess_tool_result};
use crate::config::OrchestratorConfig;
use crate::llm::LlmGateway;
use crate::placeholder::resolve_args;
use crate::plan::ExecutionPlan;
use crate::polling::execute_polling_step;
use crate::tool_invoker::ToolInvoker;
use crate::types::{FinalStateRecord, ProgressRecord, StepOutcome};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

/// Why the scheduler stopped driving the plan — feeds the Final Answer
/// Generator's "best effort" framing for the non-happy paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Completed,
    IterationCapReached,
    NoReadySteps,
    RetryCapExceeded,
    ConsecutiveFailure,
}

async fn run_single_step(
    gateway: &dyn LlmGateway,
    invoker: &dyn ToolInvoker,
    plan: &mut ExecutionPlan,
    step_id: &str,
    config: &OrchestratorConfig,
    user_query: &str,
    progress: &UnboundedSender<ProgressRecord>,
) {
    let resolved_args = {
        let step = &plan.steps[step_id];
        resolve_args(gateway, step, plan, user_query).await
    };
    plan.steps.get_mut(step_id).unwrap().tool_args = resolved_args;

    let _ = progress.send(ProgressRecord::line(format!("执行工具: {}", plan.steps[step_id].tool_name)));

    let polling_required = plan.steps[step_id].polling_required;
    let outcome = if polling_required {
        let step = plan.steps.get_mut(step_id).unwrap();
        execute_polling_step(gateway, invoker, step, config).await
    } else {
        let (tool_name, tool_args) = {
            let step = &plan.steps[step_id];
            (step.tool_name.clone(), step.tool_args.clone())
        };
        let timeout = std::time::Duration::from_secs(config.tool_execution_timeout_secs);
        match tokio::time::timeout(timeout, invoker.invoke(&tool_name, &tool_args)).await {
            Ok(Ok(text)) => StepOutcome::from_invoker_text(text),
            Ok(Err(e)) => StepOutcome::failed(format!("执行出错: {e}")),
            Err(_) => StepOutcome::failed(format!("工具执行超时(>{}s)", config.tool_execution_timeout_secs)),
        }
    };

    plan.update_step_result(step_id, outcome.success, outcome.result.clone(), outcome.error.clone());

    let prior_results: Vec<(String, serde_json::Value, String)> = plan
        .execution_results()
        .into_iter()
        .filter(|(id, _)| id != step_id)
        .map(|(id, (_, text))| {
            let args = plan.steps.get(&id).map(|s| serde_json::to_value(&s.tool_args).unwrap_or_default()).unwrap_or_default();
            (id, args, text)
        })
        .collect();

    let tool_name = plan.steps[step_id].tool_name.clone();
    let tool_args = serde_json::to_value(&plan.steps[step_id].tool_args).unwrap_or_default();
    let assessment = assess_tool_result(gateway, user_query, &tool_name, &tool_args, outcome.text(), &prior_results).await;

    let polling_info = if polling_required { format!("(轮询 {} 次)", plan.steps[step_id].polling_iteration) } else { String::new() };
    let _ = progress.send(ProgressRecord::line(format!(
        "执行步骤 {step_id} ({tool_name}) {polling_info}: {}\n",
        if outcome.success { "成功" } else { "失败" }
    )));
    let _ = progress.send(ProgressRecord::line(format!("结果: {}\n", outcome.text())));
    let _ = progress.send(ProgressRecord::line(format!(
        "评估: 满足度: {:?} (置信度: {})\n原因: {}\n",
        assessment.satisfaction_level, assessment.confidence, assessment.reason
    )));

    if assessment.problem_solved {
        plan.completed = true;
    }
}

/// Applies the same retry-cap/consecutive-failure bookkeeping to a step
/// that just finished, whether it ran alone or as part of a parallel
/// batch — the policy in §4.4/§4.4.1 makes no distinction between the two.
/// Returns `Some(reason)` if this outcome should terminate the plan.
fn record_step_outcome(
    plan: &mut ExecutionPlan,
    step_id: &str,
    retry_counts: &mut HashMap<String, usize>,
    last_failed: &mut Option<String>,
    config: &OrchestratorConfig,
) -> Option<TerminationReason> {
    if plan.steps[step_id].success.unwrap_or(false) {
        *last_failed = None;
        return None;
    }

    let count = retry_counts.entry(step_id.to_string()).or_insert(0);
    *count += 1;
    if *count >= config.max_tool_retries {
        tracing::warn!(step_id, "workflow pair retry cap exceeded");
        return Some(TerminationReason::RetryCapExceeded);
    }
    if last_failed.as_deref() == Some(step_id) {
        tracing::warn!(step_id, "two consecutive failures at the same step");
        return Some(TerminationReason::ConsecutiveFailure);
    }
    *last_failed = Some(step_id.to_string());
    plan.steps.get_mut(step_id).unwrap().executed = false;
    None
}

/// Drives `plan` to completion or exhaustion, returning the reason it
/// stopped. Progress is streamed to `progress` as it happens; the caller is
/// responsible for running the Final Answer Generator afterward.
pub async fn execute_plan(
    gateway: &dyn LlmGateway,
    invoker: &dyn ToolInvoker,
    plan: &mut ExecutionPlan,
    config: &OrchestratorConfig,
    user_query: &str,
    progress: &UnboundedSender<ProgressRecord>,
    snapshot_path: Option<&std::path::Path>,
) -> TerminationReason {
    let mut retry_counts: HashMap<String, usize> = HashMap::new();
    let mut last_failed: Option<String> = None;

    for iteration in 0..config.max_iterations {
        if plan.is_completed() || plan.completed {
            return TerminationReason::Completed;
        }

        let batches = plan.parallel_ready_groups();
        if batches.is_empty() {
            tracing::info!(iteration, "没有可执行的步骤，终止执行");
            return TerminationReason::NoReadySteps;
        }

        for batch in batches {
            if batch.len() == 1 {
                let step_id = batch[0].clone();
                run_single_step(gateway, invoker, plan, &step_id, config, user_query, progress).await;

                if let Some(reason) = record_step_outcome(plan, &step_id, &mut retry_counts, &mut last_failed, config) {
                    return reason;
                }
            } else {
                let futures = batch.iter().map(|step_id| {
                    let step_id = step_id.clone();
                    async {
                        let mut sub_plan = plan.clone();
                        run_single_step(gateway, invoker, &mut sub_plan, &step_id, config, user_query, progress).await;
                        let updated = sub_plan.steps.get(&step_id).cloned();
                        (step_id, updated)
                    }
                });
                let results = futures::future::join_all(futures).await;

                // Every step in the batch gets written back and run through
                // the same retry bookkeeping a singleton step would; a
                // termination inside the batch is only raised once every
                // member has been accounted for (no ordering within a
                // batch, per §4.4.2).
                let mut termination = None;
                for (step_id, updated) in results {
                    if let Some(step) = updated {
                        plan.steps.insert(step_id.clone(), step);
                        if let Some(reason) = record_step_outcome(plan, &step_id, &mut retry_counts, &mut last_failed, config) {
                            termination.get_or_insert(reason);
                        }
                    }
                }
                if let Some(reason) = termination {
                    return reason;
                }
            }
        }

        if let Some(path) = snapshot_path {
            if let Err(e) = plan.save_to_file(path) {
                tracing::warn!(error = %e, path = %path.display(), "failed to persist plan snapshot after batch");
            }
        }
    }

    tracing::warn!(max = config.max_iterations, "scheduler reached iteration cap");
    TerminationReason::IterationCapReached
}

/// Runs `assess_final_state` over every executed step and decides whether a
/// final answer should be generated, per §4.4.3.
pub async fn final_state(gateway: &dyn LlmGateway, user_query: &str, plan: &ExecutionPlan) -> FinalStateRecord {
    let results: Vec<(String, String)> = plan.execution_results().into_iter().map(|(id, (_, text))| {
        let tool_name = plan.steps.get(&id).map(|s| s.tool_name.clone()).unwrap_or(id);
        (tool_name, text)
    }).collect();
    assess_final_state(gateway, user_query, &results).await
}
