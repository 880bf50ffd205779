//! Placeholder Resolver (§4.3): fills in the two reference forms a plan
//! step's `tool_args` may carry before it can run.
//!
//! `${step_id}` is a mechanical reference to a prior step's raw result and
//! never touches the LLM. `[free text label]` is resolved by asking the LLM
//! to produce replacement values given the prior steps' results as context —
//! checked only when no `${...}` form matched, and only when a placeholder is
//! actually present.

use crate::json_extract::extract_json_object;
use crate::llm::LlmGateway;
use crate::plan::{ExecutionPlan, ExecutionStep};
use crate::types::ToolArgs;
use regex::Regex;
use std::sync::LazyLock;

static BRACKET_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.*?)\]").unwrap());

/// `true` if any string value in `args` contains a `[...]` placeholder.
fn has_bracket_placeholder(args: &ToolArgs) -> bool {
    args.values()
        .filter_map(|v| v.as_str())
        .any(|s| BRACKET_PLACEHOLDER.is_match(s))
}

/// Mechanical substitution: a string value of the exact form `${step_id}` is
/// replaced by that step's raw result text (or an inline error marker if the
/// id doesn't resolve). Non-matching values pass through untouched.
pub fn resolve_mechanical_refs(args: &ToolArgs, plan: &ExecutionPlan) -> ToolArgs {
    let mut out = ToolArgs::new();
    for (key, value) in args {
        if let Some(s) = value.as_str() {
            if let Some(step_id) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
                let replacement = match plan.steps.get(step_id) {
                    Some(step) if step.executed => serde_json::Value::String(step.result_text().to_string()),
                    _ => serde_json::Value::String(format!("引用错误: {step_id}不存在")),
                };
                out.insert(key.clone(), replacement);
                continue;
            }
        }
        out.insert(key.clone(), value.clone());
    }
    out
}

fn previous_results_text(plan: &ExecutionPlan) -> String {
    let mut text = String::new();
    for (step_id, (success, result)) in plan.execution_results() {
        if !success {
            continue;
        }
        text.push_str(&format!("步骤 {step_id} 结果:\n{result}\n\n"));
    }
    text
}

fn resolution_prompt(step: &ExecutionStep, user_query: &str, previous_results: &str) -> String {
    format!(
        "请根据之前步骤的执行结果，为当前工具调用生成准确的参数值。\n\n\
         用户原始问题: {user_query}\n\n\
         当前步骤信息\n\
         - 步骤ID: {}\n\
         - 工具名称: {}\n\
         - 参数(含占位符):\n{}\n\n\
         之前步骤的执行结果:\n{previous_results}\n\n\
         任务说明:\n\
         你需要替换参数中的占位符文本（如[LLM中的MCP技术搜索结果总结]）为真实内容。\n\n\
         具体操作流程:\n\
         1. 识别当前参数中需要替换的占位符（方括号[]中的内容）\n\
         2. 从之前步骤的执行结果中提取相关信息\n\
         3. 基于提取的信息生成合适的内容替换占位符\n\
         4. 保持原始JSON结构，只替换占位符部分\n\n\
         输出要求:\n\
         - 仅返回完整的JSON格式参数，不要包含其他说明\n\
         - 不要修改JSON键名，只替换值中的占位符\n\
         - 确保JSON格式有效，特殊字符需正确转义\n\
         - 不要添加额外的字段或注释\n",
        step.step_id,
        step.tool_name,
        serde_json::to_string_pretty(&step.tool_args).unwrap_or_default(),
    )
}

/// Resolves a step's `tool_args` against the plan's already-executed results.
/// Checks the mechanical `${step_id}` form first; only falls through to an
/// LLM call when a `[...]` placeholder is still present after that pass.
pub async fn resolve_args(
    gateway: &dyn LlmGateway,
    step: &ExecutionStep,
    plan: &ExecutionPlan,
    user_query: &str,
) -> ToolArgs {
    let mechanical = resolve_mechanical_refs(&step.tool_args, plan);
    if !has_bracket_placeholder(&mechanical) {
        return mechanical;
    }

    let prompt = resolution_prompt(step, user_query, &previous_results_text(plan));
    let response = gateway
        .complete(
            "你是参数优化专家，擅长根据上下文生成准确的参数值，确保生成的参数是有效的JSON格式",
            &prompt,
            0.1,
        )
        .await;

    let content = match response {
        Ok(text) => text,
        Err(_) => return mechanical,
    };

    match extract_json_object(&content) {
        Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => mechanical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with_result(step_id: &str, result: &str) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new("q");
        let mut step = ExecutionStep::new(step_id, "tool", ToolArgs::new());
        step.executed = true;
        step.success = Some(true);
        step.result = Some(result.to_string());
        plan.add_step(step);
        plan
    }

    #[test]
    fn mechanical_form_substitutes_prior_result() {
        let plan = plan_with_result("step_1", "hello world");
        let mut args = ToolArgs::new();
        args.insert("message".to_string(), serde_json::json!("${step_1}"));
        let resolved = resolve_mechanical_refs(&args, &plan);
        assert_eq!(resolved["message"], serde_json::json!("hello world"));
    }

    #[test]
    fn mechanical_form_reports_missing_reference() {
        let plan = ExecutionPlan::new("q");
        let mut args = ToolArgs::new();
        args.insert("message".to_string(), serde_json::json!("${missing}"));
        let resolved = resolve_mechanical_refs(&args, &plan);
        assert_eq!(resolved["message"], serde_json::json!("引用错误: missing不存在"));
    }

    #[test]
    fn non_placeholder_values_pass_through() {
        let plan = ExecutionPlan::new("q");
        let mut args = ToolArgs::new();
        args.insert("count".to_string(), serde_json::json!(3));
        let resolved = resolve_mechanical_refs(&args, &plan);
        assert_eq!(resolved["count"], serde_json::json!(3));
    }

    #[test]
    fn detects_bracket_placeholders() {
        let mut args = ToolArgs::new();
        args.insert("message".to_string(), serde_json::json!("搜索结果：[搜索结果摘要]"));
        assert!(has_bracket_placeholder(&args));
    }
}
