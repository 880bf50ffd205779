//! Plan-snapshot resume (E7, supplemental from the original Python
//! implementation's `plan_file` parameter): with a `log_dir` configured, a
//! previously saved, incomplete snapshot for the same query is loaded
//! instead of invoking the Plan Builder again.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tool_orchestrator::llm::MockLlmGateway;
use tool_orchestrator::{ExecutionPlan, ExecutionStep, Orchestrator, OrchestratorConfig, ProgressRecord, ToolArgs, ToolDescriptor, ToolInvoker};

struct RecordingInvoker {
    calls: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl ToolInvoker for RecordingInvoker {
    async fn invoke(&self, tool_name: &str, _args: &ToolArgs) -> Result<String, String> {
        self.calls.lock().unwrap().push(tool_name.to_string());
        Ok("多云 20℃".to_string())
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
async fn incomplete_snapshot_resumes_instead_of_rebuilding_plan() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut plan = ExecutionPlan::new("武汉天气怎么样");
    plan.add_step(ExecutionStep::new("s1", "get_weather", HashMap::new()));

    let mut hasher_input = sha2::Sha256::new();
    use sha2::Digest;
    hasher_input.update(plan.user_query.as_bytes());
    let digest = hasher_input.finalize();
    let snapshot_path = dir.path().join(format!("{:x}.json", digest));
    plan.save_to_file(&snapshot_path).expect("save snapshot");

    let assessment_response = json!({
        "satisfaction_level": "满足全部需求",
        "confidence": 0.9,
        "reason": "已完成",
        "problem_solved": true,
        "need_more_tools": false,
        "tool_failed": false,
    })
    .to_string();
    let final_state_response = json!({
        "problem_solved": true,
        "solution_level": "已解决",
        "confidence": 0.9,
        "reason": "完成",
        "need_more_tools": false,
        "generate_final": true,
    })
    .to_string();

    // Only two LLM calls expected: needs_tools, then straight into
    // assess_tool_result/assess_final_state/final answer — no
    // filter_relevant_tools or create_execution_plan call, since the
    // snapshot short-circuits the Plan Builder entirely.
    let gateway = Arc::new(MockLlmGateway::new(vec![
        "需要".to_string(),
        assessment_response,
        final_state_response,
        "武汉今天多云。".to_string(),
    ]));

    let invoker = Arc::new(RecordingInvoker { calls: std::sync::Mutex::new(Vec::new()) });
    let tool = ToolDescriptor {
        name: "get_weather".to_string(),
        description: String::new(),
        parameter_schema: json!({}),
        session: "default".to_string(),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        gateway.clone(),
        invoker.clone(),
        vec![tool],
        OrchestratorConfig { log_dir: Some(dir.path().to_path_buf()), ..OrchestratorConfig::default() },
    ));

    let rx = orchestrator.run("武汉天气怎么样", "# 工具调用助手\n你可以调用工具来完成用户的请求。", 0.7, "");
    let output = drain(rx).await;

    assert!(output.contains("从已保存的执行计划继续"));
    assert!(output.contains("武汉今天多云"));
    assert_eq!(invoker.calls.lock().unwrap().len(), 1);
}
