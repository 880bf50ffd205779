//! Per-step and final-state Assessment (§4.6): structured LLM judgments over
//! tool results, with the mandatory async-task override baked into
//! `FinalStateRecord::apply_async_override`.

use crate::json_extract::extract_json_object;
use crate::llm::LlmGateway;
use crate::types::{AssessmentRecord, FinalStateRecord, SatisfactionLevel, SolutionLevel};
use serde_json::Value;

fn bool_field(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn f64_field(v: &Value, key: &str, default: f64) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn assessment_prompt(user_query: &str, tool_name: &str, tool_args: &Value, result: &str, previous: &[(String, Value, String)]) -> String {
    let has_error = result.contains("isError=True") || result.contains("执行出错");

    let previous_context = if previous.is_empty() {
        "无".to_string()
    } else {
        previous
            .iter()
            .enumerate()
            .map(|(i, (name, args, res))| {
                format!("工具 {}: {name}\n参数: {}\n结果: {res}\n", i + 1, serde_json::to_string(args).unwrap_or_default())
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "请根据工具执行情况和历史记录，判断用户问题是否已得到解决。\n\n\
         ## 用户问题\n{user_query}\n\n\
         ## 已执行工具历史\n{previous_context}\n\n\
         ## 当前工具执行详情\n\
         工具名称: {tool_name}\n\
         输入参数: {}\n\
         执行结果: {result}\n\
         执行状态: {}\n\n\
         ## 评估标准\n\
         1. 对比工具参数与用户需求，判断参数是否准确匹配需求\n\
         2. 分析工具结果是否完整解决了对应子任务\n\
         3. 综合已执行工具历史，判断是否还有需要调用工具的子任务\n\
         4. 置信度仅基于参数与结果的匹配程度（0.7-1.0）\n\n\
         ## 判断规则\n\
         - 分析未完成任务的性质:\n\
         - 如果是\"数据获取类\"任务（如搜索、查询、计算等），则需要调用工具\n\
         - 如果是\"总结、分析、建议类\"任务（如总结信息、给建议、做推荐等），则无需调用工具\n\
         - 基于工具结果进行解释和回答的任务，无需再调用其他工具\n\n\
         ## 输出要求\n\
         请返回JSON格式：\n\
         {{\n\
         \"satisfaction_level\": \"满足全部需求/满足部分需求/不满足需求\",\n\
         \"confidence\": 0.0-1.0,\n\
         \"reason\": \"简明说明评估依据\",\n\
         \"tool_failed\": {},\n\
         \"problem_solved\": true/false,\n\
         \"need_more_tools\": true/false,\n\
         \"next_tool_suggestion\": \"建议的下一个工具（如有）\"\n\
         }}\n\n\
         注意：\n{}\n",
        serde_json::to_string(tool_args).unwrap_or_default(),
        if has_error { "失败" } else { "成功" },
        if has_error { "true" } else { "false" },
        if has_error { "由于执行失败，可能未解决用户问题" } else { "如果问题已完全解决，则不需要更多工具" },
    )
}

/// Judges a single step's result (§4.6.1). Never fails outward — an
/// unparseable LLM response degrades to the conservative default.
pub async fn assess_tool_result(
    gateway: &dyn LlmGateway,
    user_query: &str,
    tool_name: &str,
    tool_args: &Value,
    result: &str,
    previous: &[(String, Value, String)],
) -> AssessmentRecord {
    let prompt = assessment_prompt(user_query, tool_name, tool_args, result, previous);
    let response = match gateway.complete("你是一个专业的任务评估助手。", &prompt, 0.3).await {
        Ok(text) => text,
        Err(_) => return AssessmentRecord::default_on_parse_failure("解析评估结果失败"),
    };

    match extract_json_object(&response) {
        Some(v) => AssessmentRecord {
            satisfaction_level: SatisfactionLevel::from_phrase(&str_field(&v, "satisfaction_level")),
            confidence: f64_field(&v, "confidence", 0.5),
            reason: str_field(&v, "reason"),
            problem_solved: bool_field(&v, "problem_solved"),
            need_more_tools: bool_field(&v, "need_more_tools"),
            tool_failed: bool_field(&v, "tool_failed"),
            next_tool_suggestion: v.get("next_tool_suggestion").and_then(Value::as_str).map(str::to_string).filter(|s| !s.is_empty()),
        },
        None => AssessmentRecord::default_on_parse_failure("解析评估结果失败"),
    }
}

fn final_state_prompt(user_query: &str, all_tool_results: &[(String, String)]) -> String {
    let tools_context = all_tool_results
        .iter()
        .enumerate()
        .map(|(i, (tool_name, result))| format!("\n工具 {}: {tool_name}\n结果: {result}\n", i + 1))
        .collect::<String>();

    format!(
        "综合评估所有工具执行结果，判断用户问题是否已得到解决：\n\n\
         用户问题:\n{user_query}\n\n\
         所有工具执行结果:\n{tools_context}\n\n\
         特别注意:\n\
         1. 对于图像生成、文件处理等异步任务：\n\
         - 如果结果中包含\"任务ID\"、\"进度\"、\"生成中\"等关键词\n\
         - 如果任务尚未完成\n\
         这些情况下，必须将need_more_tools设为true\n\n\
         2. 只有在以下情况才能将need_more_tools设为false：\n\
         - 问题已完全解决\n\
         - 确认没有任何工具可以继续推进解决方案\n\
         - 工具执行出错且无法恢复\n\n\
         请返回JSON格式：\n\
         {{\n\
         \"problem_solved\": true/false,\n\
         \"solution_level\": \"已解决/部分解决/未解决\",\n\
         \"confidence\": 0.0-1.0,\n\
         \"reason\": \"详细原因\",\n\
         \"need_more_tools\": true/false,\n\
         \"generate_final\": true/false\n\
         }}\n"
    )
}

/// Judges the plan as a whole (§4.6.2), applying the async-task override
/// automatically before returning.
pub async fn assess_final_state(gateway: &dyn LlmGateway, user_query: &str, all_tool_results: &[(String, String)]) -> FinalStateRecord {
    if all_tool_results.is_empty() {
        return FinalStateRecord::no_tools_executed();
    }

    let prompt = final_state_prompt(user_query, all_tool_results);
    let mut record = match gateway.complete("你是一个专业的任务评估助手。", &prompt, 0.1).await {
        Ok(response) => match extract_json_object(&response) {
            Some(v) => FinalStateRecord {
                problem_solved: bool_field(&v, "problem_solved"),
                solution_level: SolutionLevel::from_phrase(&str_field(&v, "solution_level")),
                confidence: f64_field(&v, "confidence", 0.0),
                reason: str_field(&v, "reason"),
                need_more_tools: bool_field(&v, "need_more_tools"),
                generate_final: v.get("generate_final").and_then(Value::as_bool).unwrap_or(true),
                remaining_tasks: None,
            },
            None => FinalStateRecord::default_on_error("评估过程出错"),
        },
        Err(e) => FinalStateRecord::default_on_error(format!("评估过程出错: {e}")),
    };

    if let Some((_, last_result)) = all_tool_results.last() {
        record.apply_async_override(last_result);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmGateway;

    #[tokio::test]
    async fn assess_tool_result_falls_back_on_unparseable_response() {
        let gateway = MockLlmGateway::new(vec!["not json at all".to_string()]);
        let record = assess_tool_result(&gateway, "q", "search", &serde_json::json!({}), "ok", &[]).await;
        assert_eq!(record.satisfaction_level, SatisfactionLevel::None);
        assert!(record.need_more_tools);
    }

    #[tokio::test]
    async fn assess_final_state_empty_results_short_circuits() {
        let gateway = MockLlmGateway::new(vec![]);
        let record = assess_final_state(&gateway, "q", &[]).await;
        assert!(!record.problem_solved);
        assert!(record.generate_final);
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn assess_final_state_applies_async_override() {
        let response = serde_json::json!({
            "problem_solved": false,
            "solution_level": "未解决",
            "confidence": 0.8,
            "reason": "任务仍在处理",
            "need_more_tools": false,
            "generate_final": false,
        })
        .to_string();
        let gateway = MockLlmGateway::new(vec![response]);
        let results = vec![("gen_image".to_string(), "任务ID: 123, 进度: 50%".to_string())];
        let record = assess_final_state(&gateway, "q", &results).await;
        assert!(record.need_more_tools);
        assert!(record.reason.contains("异步任务"));
    }
}
