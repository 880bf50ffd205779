//! End-to-end scenarios over the public `Orchestrator` surface — no network
//! calls, everything driven by `MockLlmGateway` and an in-memory tool
//! invoker. Mirrors the two simplest literal scenarios from the component
//! design: trivial chat with no tools, and a single successful tool call.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tool_orchestrator::{Orchestrator, OrchestratorConfig, ProgressRecord, ToolArgs, ToolDescriptor, ToolInvoker};
use tool_orchestrator::llm::MockLlmGateway;

/// System prompts beginning with this put the Orchestrator into
/// tool-calling mode; anything else skips the needs-tools classifier
/// entirely (§4.1 step 1).
const TOOL_ASSISTANT_PROMPT: &str = "# 工具调用助手\n你可以调用工具来完成用户的请求。";

struct RecordingInvoker {
    calls: std::sync::Mutex<Vec<(String, ToolArgs)>>,
}

impl RecordingInvoker {
    fn new() -> Self {
        Self { calls: std::sync::Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ToolInvoker for RecordingInvoker {
    async fn invoke(&self, tool_name: &str, args: &ToolArgs) -> Result<String, String> {
        self.calls.lock().unwrap().push((tool_name.to_string(), args.clone()));
        match tool_name {
            "get_weather" => Ok("多云 20℃".to_string()),
            other => Err(format!("unknown tool {other}")),
        }
    }
}

async fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<ProgressRecord>) -> String {
    let mut out = String::new();
    while let Some(record) = rx.recv().await {
        out.push_str(&record.flatten());
    }
    out
}

#[tokio::test]
async fn trivial_chat_skips_plan_builder_entirely() {
    // E1: a plain (non-tool-assistant) system prompt streams the raw
    // completion and nothing else — no needs-tools classifier call, no plan
    // builder, no assessor.
    let gateway = Arc::new(MockLlmGateway::new(vec!["你好，有什么可以帮你？".to_string()]));
    let orchestrator = Arc::new(Orchestrator::new(
        gateway.clone(),
        Arc::new(RecordingInvoker::new()),
        vec![],
        OrchestratorConfig::default(),
    ));

    let rx = orchestrator.run("Hello", "你是一个乐于助人的助手", 0.7, "");
    let output = drain(rx).await;

    assert!(output.contains("你好，有什么可以帮你？"));
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn tool_assistant_prompt_with_no_tools_needed_still_skips_plan_builder() {
    let gateway = Arc::new(MockLlmGateway::new(vec![
        "None".to_string(),
        "你好，有什么可以帮你？".to_string(),
    ]));
    let orchestrator = Arc::new(Orchestrator::new(
        gateway.clone(),
        Arc::new(RecordingInvoker::new()),
        vec![],
        OrchestratorConfig::default(),
    ));

    let rx = orchestrator.run("Hello", TOOL_ASSISTANT_PROMPT, 0.7, "");
    let output = drain(rx).await;

    assert!(output.contains("你好，有什么可以帮你？"));
    // One call for the needs-tools classifier, one for the direct answer —
    // no plan builder, no assessor.
    assert_eq!(gateway.call_count(), 2);
}

#[tokio::test]
async fn single_tool_success_runs_full_pipeline() {
    let weather_tool = ToolDescriptor {
        name: "get_weather".to_string(),
        description: "查询城市天气".to_string(),
        parameter_schema: json!({
            "type": "object",
            "properties": { "city": { "type": "string", "description": "城市名" } },
            "required": ["city"],
        }),
        session: "default".to_string(),
    };

    let plan_response = json!({
        "steps": [{
            "step_id": "s1",
            "tool_name": "get_weather",
            "tool_args": { "city": "武汉" },
            "description": "查询武汉天气",
            "depends_on": [],
            "polling_required": false,
        }]
    })
    .to_string();

    let assessment_response = json!({
        "satisfaction_level": "满足全部需求",
        "confidence": 0.95,
        "reason": "已经返回天气信息",
        "problem_solved": true,
        "need_more_tools": false,
        "tool_failed": false,
    })
    .to_string();

    let final_state_response = json!({
        "problem_solved": true,
        "solution_level": "已解决",
        "confidence": 0.95,
        "reason": "天气查询已完成",
        "need_more_tools": false,
        "generate_final": true,
    })
    .to_string();

    let gateway = Arc::new(MockLlmGateway::new(vec![
        "需要".to_string(),            // needs_tools
        "[\"get_weather\"]".to_string(), // filter_relevant_tools
        plan_response,                  // create_execution_plan
        assessment_response,            // assess_tool_result for s1
        final_state_response,           // assess_final_state
        "武汉今天多云，20摄氏度。".to_string(), // final answer stream
    ]));

    let invoker = Arc::new(RecordingInvoker::new());
    let orchestrator = Arc::new(Orchestrator::new(
        gateway.clone(),
        invoker.clone(),
        vec![weather_tool],
        OrchestratorConfig::default(),
    ));

    let rx = orchestrator.run("武汉天气怎么样", TOOL_ASSISTANT_PROMPT, 0.7, "");
    let output = drain(rx).await;

    assert!(output.contains("执行工具: get_weather"));
    assert!(output.contains("武汉今天多云"));

    let calls = invoker.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "get_weather");
    assert_eq!(calls[0].1.get("city").and_then(|v| v.as_str()), Some("武汉"));
}

#[tokio::test]
async fn unparseable_plan_falls_back_to_direct_answer() {
    let gateway = Arc::new(MockLlmGateway::new(vec![
        "需要".to_string(),
        "[]".to_string(),
        "这不是 JSON".to_string(),
        "好的，我直接回答你的问题。".to_string(),
    ]));
    let orchestrator = Arc::new(Orchestrator::new(
        gateway.clone(),
        Arc::new(RecordingInvoker::new()),
        vec![],
        OrchestratorConfig::default(),
    ));

    let rx = orchestrator.run("帮我处理一下这个任务", TOOL_ASSISTANT_PROMPT, 0.7, "");
    let output = drain(rx).await;

    assert!(output.contains("未能生成执行计划"));
    assert!(output.contains("好的，我直接回答你的问题。"));
}
