//! Polling Driver completion property (Testable Property #7 / E4): a step
//! that reports running on its first two invocations and completed on the
//! third should finish after exactly three calls, with the heuristic alone
//! deciding completion — no LLM judge call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tool_orchestrator::llm::MockLlmGateway;
use tool_orchestrator::{ExecutionStep, OrchestratorConfig, ToolArgs, ToolInvoker};

struct ThreeCallInvoker {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolInvoker for ThreeCallInvoker {
    async fn invoke(&self, _tool_name: &str, _args: &ToolArgs) -> Result<String, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(match n {
            1 => r#"{"status": "running", "progress": 40}"#.to_string(),
            2 => r#"{"status": "running", "progress": 80}"#.to_string(),
            _ => r#"{"status": "completed", "url": "http://example/img.png"}"#.to_string(),
        })
    }
}

#[tokio::test]
async fn heuristic_completion_fires_on_third_poll_without_an_llm_call() {
    // No programmed responses: if the polling driver ever fell through to
    // the LLM judge, the gateway call would fail and the step would fail too.
    let gateway = MockLlmGateway::new(vec![]);
    let invoker = ThreeCallInvoker { calls: AtomicUsize::new(0) };
    let config = OrchestratorConfig::default();

    let mut step = ExecutionStep::new("s2", "get_image_progress", HashMap::new());
    step.polling_required = true;
    step.polling_interval = 0;
    step.polling_condition = "completed".to_string();

    let outcome = tool_orchestrator::polling::execute_polling_step(&gateway, &invoker, &mut step, &config).await;

    assert!(outcome.success);
    assert!(outcome.result.unwrap().contains("completed"));
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);
    assert_eq!(gateway.call_count(), 0);
}
