//! Orchestrator: the single public entry point (§4.1). A query whose
//! `system_prompt` doesn't mark tool-assistant mode gets a plain completion
//! and nothing else runs. Otherwise the needs-tools classifier decides
//! between a plain completion (tool catalog folded into the system message)
//! and the full Plan Builder → Plan Scheduler → Final Answer Generator
//! pipeline, streaming progress and answer tokens to the caller over one
//! ordered channel.

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::final_answer::generate_final_answer;
use crate::llm::LlmGateway;
use crate::plan::ExecutionPlan;
use crate::plan_builder::{classify_tool_need, create_execution_plan, tool_list_json};
use crate::scheduler::{execute_plan, final_state, TerminationReason};
use crate::tool_invoker::ToolInvoker;
use crate::types::{ProgressRecord, StepOutcome, ToolArgs, ToolDescriptor};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// `system_prompt`s beginning with this marker put the Orchestrator into
/// tool-calling mode (§4.1 step 1-2); anything else is routed straight to a
/// plain pass-through completion. Mirrors
/// `mcp_client.py`'s `system_prompt.startswith("# 工具调用助手")` gate exactly.
const TOOL_ASSISTANT_MARKER: &str = "# 工具调用助手";

/// Wires an `LlmGateway`, a `ToolInvoker`, and a tool catalog into one
/// runnable query surface. Built via `OrchestratorBuilder`.
pub struct Orchestrator {
    llm_gateway: Arc<dyn LlmGateway>,
    tool_invoker: Arc<dyn ToolInvoker>,
    tools: Vec<ToolDescriptor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        llm_gateway: Arc<dyn LlmGateway>,
        tool_invoker: Arc<dyn ToolInvoker>,
        tools: Vec<ToolDescriptor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { llm_gateway, tool_invoker, tools, config }
    }

    /// Runs one query end to end on a spawned task, returning a channel the
    /// caller drains for progress lines and the streamed final answer. The
    /// channel simply closes when the query is done; a caller that drops the
    /// receiver early just stops the task's sends from landing anywhere.
    pub fn run(
        self: &Arc<Self>,
        user_query: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f32,
        history: impl Into<String>,
    ) -> UnboundedReceiver<ProgressRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);
        let user_query = user_query.into();
        let system_prompt = system_prompt.into();
        let history = history.into();
        tokio::spawn(async move {
            this.drive(user_query, system_prompt, temperature, history, tx).await;
        });
        rx
    }

    /// Snapshot file this query would resume from/save to, if `log_dir` is
    /// configured — keyed by a hash of the query text so the same query
    /// reliably maps back to the same file across runs.
    fn snapshot_path(&self, user_query: &str) -> Option<PathBuf> {
        let dir = self.config.log_dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(user_query.as_bytes());
        let digest = hasher.finalize();
        Some(dir.join(format!("{:x}.json", digest)))
    }

    async fn drive(
        &self,
        user_query: String,
        system_prompt: String,
        temperature: f32,
        history: String,
        tx: UnboundedSender<ProgressRecord>,
    ) {
        if !system_prompt.starts_with(TOOL_ASSISTANT_MARKER) {
            // Not tool-assistant mode at all: the caller's system prompt is
            // used verbatim and nothing else in this module runs — no
            // classifier call, no plan, no safety-check pass.
            self.stream_plain(&system_prompt, &user_query, &history, temperature, &tx).await;
            return;
        }

        let needs_tools = match classify_tool_need(self.llm_gateway.as_ref(), &user_query).await {
            Ok(needed) => needed,
            Err(e) => {
                // The gateway is unreachable at the transport level, not just
                // returning something we couldn't parse — no safe default
                // exists without an LLM at all, so the query aborts here
                // instead of limping into a plan build that would only fail
                // the same way on its own first call.
                let err = OrchestratorError::Gateway(e);
                tracing::error!(error = %err, "aborting query: llm gateway unavailable");
                let _ = tx.send(ProgressRecord::Structured {
                    message: None,
                    tool_name: None,
                    final_assessment: None,
                    should_generate_final: None,
                    final_summary: None,
                    error: Some(err.to_string()),
                    final_failure: None,
                });
                let _ = tx.send(ProgressRecord::terminal(false, true));
                return;
            }
        };
        if !needs_tools {
            // §4.1 step 3: still a plain completion, but one that tells the
            // model what tools exist so it can explain them if asked.
            let system = format!("你是一个助人为乐的助手，你可以使用以下工具:{}", tool_list_json(&self.tools));
            self.stream_plain(&system, &user_query, &history, temperature, &tx).await;
            return;
        }

        let snapshot_path = self.snapshot_path(&user_query);
        let resumed = snapshot_path
            .as_deref()
            .and_then(|path| ExecutionPlan::load_from_file(path).ok())
            .filter(|plan| !plan.is_completed() && !plan.completed);

        let mut plan = if let Some(plan) = resumed {
            let _ = tx.send(ProgressRecord::line("从已保存的执行计划继续".to_string()));
            plan
        } else {
            create_execution_plan(self.llm_gateway.as_ref(), &user_query, &history, &self.tools).await
        };

        if plan.steps.is_empty() {
            let _ = tx.send(ProgressRecord::line("未能生成执行计划，转为直接回答".to_string()));
            self.stream_answer(&user_query, &history, &[], temperature, &tx).await;
            return;
        }

        let _ = tx.send(ProgressRecord::line(plan.todo_list()));
        if let Some(path) = &snapshot_path {
            if let Err(e) = plan.save_to_file(path) {
                tracing::warn!(error = %e, path = %path.display(), "failed to persist initial plan snapshot");
            }
        }

        let reason = execute_plan(
            self.llm_gateway.as_ref(),
            self.tool_invoker.as_ref(),
            &mut plan,
            &self.config,
            &user_query,
            &tx,
            snapshot_path.as_deref(),
        )
        .await;
        tracing::info!(?reason, steps = plan.steps.len(), "plan execution finished");

        let final_record = final_state(self.llm_gateway.as_ref(), &user_query, &plan).await;
        let _ = tx.send(ProgressRecord::Structured {
            message: None,
            tool_name: None,
            final_assessment: Some(final_record.reason.clone()),
            should_generate_final: Some(final_record.generate_final),
            final_summary: None,
            error: None,
            final_failure: None,
        });

        if !final_record.generate_final && !matches!(reason, TerminationReason::Completed) {
            let _ = tx.send(ProgressRecord::terminal(false, true));
            return;
        }

        let execution_results: Vec<(String, bool, String)> = plan
            .execution_results()
            .into_iter()
            .map(|(id, (ok, text))| (id, ok, text))
            .collect();
        self.stream_answer(&user_query, &history, &execution_results, temperature, &tx).await;
    }

    /// Invokes one named tool directly, bypassing the Plan Builder and
    /// Scheduler entirely — an operational diagnostic, not part of the query
    /// pipeline. Uses the same timeout and failure-message shape a planned
    /// step would (§4.4.1), so a caller probing connectivity sees results
    /// consistent with what the Scheduler itself would have recorded.
    pub async fn probe_tool(&self, tool_name: &str, args: ToolArgs) -> StepOutcome {
        let timeout = std::time::Duration::from_secs(self.config.tool_execution_timeout_secs);
        match tokio::time::timeout(timeout, self.tool_invoker.invoke(tool_name, &args)).await {
            Ok(Ok(text)) => StepOutcome::from_invoker_text(text),
            Ok(Err(e)) => StepOutcome::failed(format!("执行出错: {e}")),
            Err(_) => StepOutcome::failed(format!("工具执行超时(>{}s)", self.config.tool_execution_timeout_secs)),
        }
    }

    /// Streams the §4.7 safety-checked summary over accumulated tool
    /// results. Only reached once a plan has actually been built (or failed
    /// to build) — never for a query that skipped planning entirely.
    async fn stream_answer(
        &self,
        user_query: &str,
        history: &str,
        execution_results: &[(String, bool, String)],
        temperature: f32,
        tx: &UnboundedSender<ProgressRecord>,
    ) {
        let mut stream = generate_final_answer(self.llm_gateway.as_ref(), user_query, history, execution_results, temperature);
        while let Some(chunk) = stream.next().await {
            if tx.send(ProgressRecord::line(chunk)).is_err() {
                return;
            }
        }
        let _ = tx.send(ProgressRecord::terminal(true, false));
    }

    /// Streams a plain completion with no safety-check pass and no
    /// `<think>` stripping — `system_prompt` is used verbatim as the system
    /// message, and `history` (if any) is folded ahead of the user query in
    /// the user message, mirroring `mcp_client.py`'s two non-workflow
    /// branches (a non-tool-assistant system prompt, and "tools exist but
    /// this query doesn't need them").
    async fn stream_plain(&self, system_prompt: &str, user_query: &str, history: &str, temperature: f32, tx: &UnboundedSender<ProgressRecord>) {
        let user_prompt = if history.is_empty() { user_query.to_string() } else { format!("{history}\n\n{user_query}") };
        let mut stream = self.llm_gateway.complete_stream(system_prompt.to_string(), user_prompt, temperature);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    if tx.send(ProgressRecord::line(text)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "plain completion stream error");
                    break;
                }
            }
        }
        let _ = tx.send(ProgressRecord::terminal(true, false));
    }
}
