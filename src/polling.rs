//! Polling Driver (§4.5): drives a step marked `polling_required` to
//! completion, sleeping between attempts until a heuristic or LLM judge says
//! the underlying async job is done, or `max_iterations` is reached.

use crate::config::OrchestratorConfig;
use crate::llm::LlmGateway;
use crate::plan::ExecutionStep;
use crate::tool_invoker::ToolInvoker;
use crate::types::StepOutcome;

const COMPLETION_KEYWORDS: [&str; 11] =
    ["completed", "finished", "done", "success", "complete", "完成", "成功", "结束", "就绪", "100%", "100percent"];

/// Heuristic completion check: keyword scan over the raw result text, plus a
/// structured-field shortcut when the result happens to carry
/// `status`/`state`/`progress` keys. Runs before ever asking the LLM.
fn heuristic_says_done(result_text: &str) -> bool {
    let lower = result_text.to_lowercase();
    if COMPLETION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(result_text) {
        let field_done = |key: &str| {
            v.get(key)
                .and_then(|f| f.as_str())
                .map(|s| matches!(s.to_lowercase().as_str(), "completed" | "success" | "done" | "完成" | "成功"))
                .unwrap_or(false)
        };
        let progress_done = v.get("progress").map(|p| p == 100 || p == "100%").unwrap_or(false);
        if field_done("status") || field_done("state") || progress_done {
            return true;
        }
    }

    false
}

async fn llm_judge_done(gateway: &dyn LlmGateway, step: &ExecutionStep, result_text: &str) -> bool {
    let prompt = format!(
        "请判断以下任务结果是否表明任务已完成，无需继续轮询。\n\n\
         步骤ID: {}\n工具名称: {}\n当前轮询次数: {}\n\n当前结果:\n{result_text}\n\n\
         请只输出:已完成/未完成\n不要有任何其他解释。\n",
        step.step_id, step.tool_name, step.polling_iteration,
    );

    match gateway.complete("你是轮询判断专家，能准确判断任务是否已完成", &prompt, 0.1).await {
        Ok(content) => {
            let lower = content.trim().to_lowercase();
            lower.contains("已完成") || lower.contains("完成") || lower.contains("done") || lower.contains("completed")
        }
        Err(_) => false,
    }
}

/// Checks a single poll result against the step's completion condition: the
/// keyword/field heuristic always runs first; the LLM judge is only
/// consulted when `polling_condition` is unset AND the heuristic didn't
/// already settle it — asking the LLM to confirm what the heuristic already
/// fired on would be a wasted call.
async fn is_poll_complete(gateway: &dyn LlmGateway, step: &ExecutionStep, result_text: &str) -> bool {
    if heuristic_says_done(result_text) {
        return true;
    }
    if step.polling_condition.is_empty() {
        return llm_judge_done(gateway, step, result_text).await;
    }
    false
}

/// Runs the step repeatedly until `is_poll_complete` says so or
/// `config.max_iterations` attempts have elapsed, sleeping
/// `step.polling_interval` seconds between attempts. Mirrors the "if we ran
/// out of iterations but got *a* result, treat it as good enough" behavior —
/// only a true invocation error aborts the poll outright.
pub async fn execute_polling_step(
    gateway: &dyn LlmGateway,
    invoker: &dyn ToolInvoker,
    step: &mut ExecutionStep,
    config: &OrchestratorConfig,
) -> StepOutcome {
    let mut last_result: Option<String> = None;

    for attempt in 1..=config.max_iterations {
        step.polling_iteration = attempt;

        let outcome = invoker.invoke(&step.tool_name, &step.tool_args).await;
        let Ok(result_text) = outcome else {
            let error = outcome.unwrap_err();
            tracing::error!(step_id = %step.step_id, error = %error, "polling step invocation failed");
            return StepOutcome::failed(format!("轮询执行出错: {error}"));
        };

        last_result = Some(result_text.clone());

        if is_poll_complete(gateway, step, &result_text).await {
            tracing::info!(step_id = %step.step_id, attempts = attempt, "polling step completed");
            return StepOutcome::ok(result_text);
        }

        if attempt < config.max_iterations {
            tokio::time::sleep(std::time::Duration::from_secs(step.polling_interval)).await;
        }
    }

    match last_result {
        Some(result) => {
            tracing::warn!(step_id = %step.step_id, max = config.max_iterations, "polling step reached max iterations, returning last result");
            StepOutcome::ok(result)
        }
        None => StepOutcome::failed(format!("轮询步骤 {} 达到最大轮询次数 {} 但未获得有效结果", step.step_id, config.max_iterations)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_matches_completion_keyword() {
        assert!(heuristic_says_done("任务已完成"));
        assert!(heuristic_says_done("status: success"));
        assert!(!heuristic_says_done("still running"));
    }

    #[test]
    fn heuristic_matches_structured_progress_field() {
        assert!(heuristic_says_done(r#"{"progress": 100}"#));
        assert!(heuristic_says_done(r#"{"status": "completed"}"#));
        assert!(!heuristic_says_done(r#"{"progress": 40}"#));
    }

    fn step_with_condition(condition: &str) -> ExecutionStep {
        let mut step = ExecutionStep::new("s1", "get_image_progress", crate::types::ToolArgs::new());
        step.polling_condition = condition.to_string();
        step
    }

    #[tokio::test]
    async fn heuristic_firing_skips_llm_judge_even_with_no_condition() {
        // The common case the bug lived in: `polling_condition` left blank
        // by the Plan Builder. The heuristic alone must decide here — an
        // empty response queue means any LLM call would error the step.
        let gateway = crate::llm::MockLlmGateway::new(vec![]);
        let step = step_with_condition("");
        assert!(is_poll_complete(&gateway, &step, r#"{"status": "completed"}"#).await);
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_condition_falls_through_to_llm_judge_when_heuristic_silent() {
        let gateway = crate::llm::MockLlmGateway::new(vec!["已完成".to_string()]);
        let step = step_with_condition("");
        assert!(is_poll_complete(&gateway, &step, "拍摄中，请稍候").await);
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn non_empty_condition_never_calls_llm_even_when_heuristic_silent() {
        let gateway = crate::llm::MockLlmGateway::new(vec![]);
        let step = step_with_condition("completed");
        assert!(!is_poll_complete(&gateway, &step, "拍摄中，请稍候").await);
        assert_eq!(gateway.call_count(), 0);
    }
}
