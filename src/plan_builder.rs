//! Plan Builder (§4.2): turns a user query plus a tool catalog into an
//! `ExecutionPlan`, through three LLM calls — a needs-tools classifier, a
//! relevance pre-filter, and the plan synthesis call itself.

use crate::json_extract::{extract_json_object, strip_leading_think_block};
use crate::llm::LlmGateway;
use crate::plan::{ExecutionPlan, ExecutionStep};
use crate::types::{ToolArgs, ToolDescriptor};
use serde_json::Value;

/// Classifies whether a query needs tool orchestration at all (§4.2.1). A
/// `false` here means the Orchestrator should answer directly instead of
/// building a plan. Folds a gateway failure into `false` — see
/// `classify_tool_need` for the variant that keeps the distinction, which
/// the Orchestrator uses to tell "conversational query" apart from
/// "LLM gateway is unreachable" at the one point in the pipeline where that
/// distinction still matters (§7: total gateway unavailability aborts the
/// query rather than silently degrading).
pub async fn needs_tools(gateway: &dyn LlmGateway, user_query: &str) -> bool {
    classify_tool_need(gateway, user_query).await.unwrap_or(false)
}

/// Same classifier as `needs_tools`, but surfaces a gateway failure as `Err`
/// instead of collapsing it into `false`.
pub async fn classify_tool_need(gateway: &dyn LlmGateway, user_query: &str) -> Result<bool, String> {
    let prompt = format!(
        "分析以下用户问题，判断是否需要使用外部工具或API来回答。\n\n\
         用户问题: {user_query}\n\n\
         如果问题满足以下任一条件，就需要工具调用:\n\
         1. 需要实时信息(天气、股票、新闻等)\n\
         2. 需要执行计算或数据处理\n\
         3. 需要搜索网络或数据库\n\
         4. 需要生成或处理媒体内容(图像、音频等)\n\
         5. 需要与外部系统交互(发送邮件、消息等)\n\n\
         如果问题满足以下条件，不需要工具调用:\n\
         1. 仅需要常识或基本知识\n\
         2. 是简单的问候或闲聊\n\
         3. 是请求解释概念或原理\n\
         4. 是对已知信息的总结或分析\n\
         5. 是不需要实时数据的简单问答\n\n\
         请只回答\"需要\"或\"None\"，不要有任何其他解释。\n"
    );

    let response = gateway.complete("你是工具需求分析专家，能够准确判断问题是否需要外部工具", &prompt, 0.1).await?;

    let content = strip_leading_think_block(&response.trim().to_lowercase());
    Ok(content.contains("需要"))
}

pub(crate) fn tool_list_json(tools: &[ToolDescriptor]) -> String {
    let list: Vec<Value> = tools
        .iter()
        .map(|t| serde_json::json!({"name": t.name, "description": t.description}))
        .collect();
    serde_json::to_string(&list).unwrap_or_default()
}

/// Relevance pre-filter (§4.2.2): asks the LLM to name a subset of the
/// catalog relevant to this query. Falls back to the whole catalog whenever
/// the response doesn't parse, names nothing in the catalog, or the LLM call
/// itself fails — an empty filtered set must never stop planning outright.
pub async fn filter_relevant_tools(gateway: &dyn LlmGateway, user_query: &str, tools: &[ToolDescriptor]) -> Vec<ToolDescriptor> {
    let tools_json = tool_list_json(tools);
    let prompt = format!(
        "分析用户查询，从提供的工具列表中选择最适合完成任务的工具。\n\n\
         用户查询: {user_query}\n\n\
         可用工具列表:\n{tools_json}\n\n\
         选择规则:\n\
         1. 只选择与任务直接相关的工具\n\
         2. 网络搜索工具只有在用户明确需要获取网络信息时才选择\n\
         3. 对于生成类任务(如图像生成)，必须包含提交任务和检查进度的相关工具\n\
         4. 避免选择功能重复的工具\n\
         5. 确保包含所有必要的工具以完成完整的工作流程\n\
         6. 音频、语音工具只有在用户明确需要时才选择\n\n\
         对于特殊任务的工具选择规则:\n\
         - 图像生成任务：必须包含\"generate_image\"(提交任务)和\"get_image_progress\"(检查进度)\n\
         - 语音相关任务：只有在用户明确要求语音功能时才选择相关工具\n\
         - 文件处理任务：包含必要的上传、处理和下载工具\n\
         - 社交媒体任务：必须包含发送和接收消息的工具\n\n\
         请返回一个JSON数组，包含选中工具的名称:\n\
         [\"工具名1\", \"工具名2\", ...]\n"
    );

    let response = match gateway.complete("你是工具选择专家，能够根据用户需求筛选最合适的工具", &prompt, 0.1).await {
        Ok(r) => r,
        Err(_) => return tools.to_vec(),
    };

    let content = strip_leading_think_block(&response);
    let selected: Vec<String> = match extract_json_object(&content) {
        Some(Value::Array(items)) => items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => match serde_json::from_str::<Vec<String>>(content.trim()) {
            Ok(names) => names,
            Err(_) => return tools.to_vec(),
        },
    };

    if selected.is_empty() {
        return tools.to_vec();
    }

    let filtered: Vec<ToolDescriptor> = tools.iter().filter(|t| selected.contains(&t.name)).cloned().collect();
    if filtered.is_empty() {
        tools.to_vec()
    } else {
        filtered
    }
}

fn describe_tool(tool: &ToolDescriptor) -> String {
    let mut param_lines = Vec::new();
    if let Some(props) = tool.parameter_schema.get("properties").and_then(Value::as_object) {
        let required: Vec<&str> = tool
            .parameter_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        for (name, info) in props {
            let is_required = required.contains(&name.as_str());
            let desc = info.get("description").and_then(Value::as_str).unwrap_or_default();
            let ptype = info.get("type").and_then(Value::as_str).unwrap_or_default();
            param_lines.push(format!("- {name} ({}): {desc} (类型: {ptype})", if is_required { "必填" } else { "选填" }));
        }
    }
    format!("工具名称: {}\n描述: {}\n参数:\n{}", tool.name, tool.description, param_lines.join("\n"))
}

fn plan_prompt(user_query: &str, history: &str, tools: &[ToolDescriptor]) -> String {
    let tools_text = tools.iter().map(describe_tool).collect::<Vec<_>>().join("\n\n");
    format!(
        "分析用户查询，创建一个详细的执行计划，包括工具选择、参数设置和执行顺序。\n\n\
         用户查询: {user_query}\n\n\
         用户的历史记录: {history}\n\n\
         可用工具:\n{tools_text}\n\n\
         请创建一个执行计划，包括以下内容:\n\
         1. 确定需要执行的工具操作\n\
         2. 设置每个操作的参数\n\
         3. 确定操作之间的依赖关系\n\
         4. 标记可以并行执行的操作\n\
         5. 标记需要轮询的操作（对于那些可能需要多次查询才能获得最终结果的任务）\n\n\
         重要说明: 当一个步骤需要使用前一个步骤的结果时，请使用方括号占位符格式，例如 [占位符名称]。\n\
         例如: step_1查询了武汉天气，step_3需要发送这个信息，应设置 \"message\": \"武汉的天气是: [武汉天气]\"\n\n\
         关于轮询操作:\n\
         某些工具操作（如检查异步任务进度、查询长时间运行的任务状态等）可能需要多次执行直到获得最终结果。对于这类步骤，请设置 polling_required 为 true。\n\n\
         返回JSON格式:\n\
         {{\n\
         \"steps\": [\n\
         {{\n\
         \"step_id\": \"唯一标识符\",\n\
         \"tool_name\": \"工具名称\",\n\
         \"tool_args\": {{\"参数名\": \"参数值或带占位符的字符串\"}},\n\
         \"description\": \"步骤描述\",\n\
         \"depends_on\": [\"依赖的步骤ID列表\"],\n\
         \"parallel_group\": \"并行组标识符(可选)\",\n\
         \"polling_required\": false,\n\
         \"polling_interval\": 5,\n\
         \"polling_condition\": \"\"\n\
         }}\n\
         ]\n\
         }}\n\n\
         注意事项:\n\
         1. 每个步骤必须有唯一的step_id\n\
         2. 所有必需参数都必须提供\n\
         3. depends_on指定步骤依赖的其他步骤ID\n\
         4. 可以并行执行的步骤应该有相同的parallel_group值(例如\"parallel_1\")\n\
         5. 没有依赖关系的步骤可以有空的depends_on数组\n\
         6. 确保没有循环依赖\n\
         7. 只使用必要的工具来完成任务\n\
         8. 对于依赖前面步骤结果的参数，使用清晰的占位符如 [武汉天气]、[股票信息] 等\n\
         9. 依赖关系和占位符必须一致，如果step_3依赖step_1的结果，step_3中的参数应该使用与step_1相关的占位符\n\
         10. 除非用户明确需要，否则不要使用与音频、语音相关的工具\n\
         11. 对于检查任务状态、查询进度等操作，考虑将其标记为需要轮询的步骤\n\
         12. 除非用户明确要求，否则不要使用网络搜索相关的工具\n"
    )
}

/// Synthesizes an `ExecutionPlan` for `user_query` (§4.2.3). Any failure —
/// an unreachable gateway, an unparseable response, a response missing a
/// `steps` array — degrades to an empty plan rather than propagating an
/// error, matching the "recoverable failure is data" design used throughout.
pub async fn create_execution_plan(gateway: &dyn LlmGateway, user_query: &str, history: &str, tools: &[ToolDescriptor]) -> ExecutionPlan {
    let filtered = filter_relevant_tools(gateway, user_query, tools).await;
    let prompt = plan_prompt(user_query, history, &filtered);

    let response = match gateway.complete("你是执行计划专家，擅长分析复杂任务并设计最优执行流程", &prompt, 0.1).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "创建执行计划出错");
            return ExecutionPlan::new(user_query);
        }
    };

    let content = strip_leading_think_block(&response);
    let Some(plan_data) = extract_json_object(&content) else {
        tracing::error!(content, "无法解析执行计划");
        return ExecutionPlan::new(user_query);
    };

    let Some(steps) = plan_data.get("steps").and_then(Value::as_array) else {
        tracing::error!("执行计划响应缺少 steps 字段");
        return ExecutionPlan::new(user_query);
    };

    let mut plan = ExecutionPlan::new(user_query);
    for step_data in steps {
        let Some(step_id) = step_data.get("step_id").and_then(Value::as_str) else { continue };
        let Some(tool_name) = step_data.get("tool_name").and_then(Value::as_str) else { continue };
        let tool_args: ToolArgs = step_data
            .get("tool_args")
            .and_then(Value::as_object)
            .map(|m| m.clone().into_iter().collect())
            .unwrap_or_default();

        let mut step = ExecutionStep::new(step_id, tool_name, tool_args);
        step.description = step_data.get("description").and_then(Value::as_str).unwrap_or_default().to_string();
        step.depends_on = step_data
            .get("depends_on")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        step.parallel_group = step_data.get("parallel_group").and_then(Value::as_str).map(str::to_string);
        step.polling_required = step_data.get("polling_required").and_then(Value::as_bool).unwrap_or(false);
        step.polling_interval = step_data.get("polling_interval").and_then(Value::as_u64).unwrap_or(5);
        step.polling_condition = step_data.get("polling_condition").and_then(Value::as_str).unwrap_or_default().to_string();

        plan.add_step(step);
    }

    let valid_ids: std::collections::HashSet<String> = plan.steps.keys().cloned().collect();
    for step in plan.steps.values_mut() {
        step.depends_on.retain(|dep| valid_ids.contains(dep));
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmGateway;

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            parameter_schema: serde_json::json!({}),
            session: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn needs_tools_detects_affirmative_phrase() {
        let gateway = MockLlmGateway::new(vec!["需要".to_string()]);
        assert!(needs_tools(&gateway, "今天北京天气怎么样").await);
    }

    #[tokio::test]
    async fn needs_tools_false_on_gateway_error() {
        let gateway = MockLlmGateway::new(vec![]);
        assert!(!needs_tools(&gateway, "hi").await);
    }

    #[tokio::test]
    async fn filter_falls_back_to_full_catalog_on_empty_selection() {
        let gateway = MockLlmGateway::new(vec!["[]".to_string()]);
        let tools = vec![tool("search"), tool("weather")];
        let filtered = filter_relevant_tools(&gateway, "q", &tools).await;
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn create_execution_plan_empty_on_missing_steps_field() {
        let gateway = MockLlmGateway::new(vec!["[]".to_string(), r#"{"not_steps": []}"#.to_string()]);
        let plan = create_execution_plan(&gateway, "q", "", &[tool("search")]).await;
        assert!(plan.steps.is_empty());
    }

    #[tokio::test]
    async fn create_execution_plan_sanitizes_dangling_dependencies() {
        let filter_response = serde_json::json!(["search"]).to_string();
        let plan_response = serde_json::json!({
            "steps": [{
                "step_id": "step_1",
                "tool_name": "search",
                "tool_args": {},
                "depends_on": ["ghost_step"],
            }]
        })
        .to_string();
        let gateway = MockLlmGateway::new(vec![filter_response, plan_response]);
        let plan = create_execution_plan(&gateway, "q", "", &[tool("search")]).await;
        assert!(plan.steps["step_1"].depends_on.is_empty());
    }
}
