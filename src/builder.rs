use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::llm::{AnthropicGateway, LlmGateway, OpenAiGateway, RetryingLlmGateway};
use crate::orchestrator::Orchestrator;
use crate::tool_invoker::ToolInvoker;
use crate::types::ToolDescriptor;
use std::sync::Arc;

/// Fluent assembly of an `Orchestrator` from an LLM provider, a tool
/// invoker, and a catalog — mirrors the provider convenience methods of the
/// state-machine builder this crate grew out of.
pub struct OrchestratorBuilder {
    llm_gateway: Option<Arc<dyn LlmGateway>>,
    tool_invoker: Option<Arc<dyn ToolInvoker>>,
    tools: Vec<ToolDescriptor>,
    config: OrchestratorConfig,
    retry_count: Option<u32>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            llm_gateway: None,
            tool_invoker: None,
            tools: Vec::new(),
            config: OrchestratorConfig::default(),
            retry_count: None,
        }
    }

    // ── LLM provider setters ──────────────────────────────────────────────

    /// Set the LLM gateway explicitly — the escape hatch for any provider
    /// not covered by the convenience methods below.
    pub fn llm_gateway(mut self, gateway: Arc<dyn LlmGateway>) -> Self {
        self.llm_gateway = Some(gateway);
        self
    }

    /// Use the standard OpenAI API. Reads `OPENAI_API_KEY` from the
    /// environment if you pass `""`.
    pub fn openai(mut self, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let key = api_key.into();
        let gateway = if key.is_empty() {
            OpenAiGateway::from_env(model)
        } else {
            Ok(OpenAiGateway::with_base_url("https://api.openai.com", key, model))
        };
        if let Ok(gateway) = gateway {
            self.llm_gateway = Some(Arc::new(gateway));
        }
        self
    }

    /// Use Groq's OpenAI-compatible inference API.
    pub fn groq(mut self, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let gateway = OpenAiGateway::with_base_url("https://api.groq.com/openai", api_key, model);
        self.llm_gateway = Some(Arc::new(gateway));
        self
    }

    /// Use a local Ollama instance (OpenAI-compatible API).
    pub fn ollama(mut self, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let url = {
            let s = base_url.into();
            if s.is_empty() { "http://localhost:11434".to_string() } else { s }
        };
        let gateway = OpenAiGateway::with_base_url(url, "ollama", model);
        self.llm_gateway = Some(Arc::new(gateway));
        self
    }

    /// Use the Anthropic API. Reads `ANTHROPIC_API_KEY` from the environment.
    pub fn anthropic(mut self, model: impl Into<String>) -> Self {
        if let Ok(gateway) = AnthropicGateway::from_env(model) {
            self.llm_gateway = Some(Arc::new(gateway));
        }
        self
    }

    /// Wrap the current LLM gateway with automatic retry on transient
    /// errors. Must be called after a provider method.
    pub fn retry_on_error(mut self, n: u32) -> Self {
        self.retry_count = Some(n);
        self
    }

    // ── Tool wiring ─────────────────────────────────────────────────────

    pub fn tool_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.tool_invoker = Some(invoker);
        self
    }

    pub fn tool_catalog(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn add_tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }

    // ── Configuration ───────────────────────────────────────────────────

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.config.max_iterations = n;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.log_dir = Some(dir.into());
        self
    }

    // ── Build ───────────────────────────────────────────────────────────

    pub fn build(mut self) -> Result<Orchestrator, OrchestratorError> {
        let mut gateway = self
            .llm_gateway
            .take()
            .ok_or_else(|| OrchestratorError::Build("LLM gateway is required. Use .openai(), .groq(), .ollama(), .anthropic(), or .llm_gateway()".to_string()))?;

        if let Some(n) = self.retry_count {
            gateway = Arc::new(RetryingLlmGateway::new(gateway, n));
        }

        let invoker = self
            .tool_invoker
            .take()
            .ok_or_else(|| OrchestratorError::Build("tool invoker is required. Use .tool_invoker()".to_string()))?;

        Ok(Orchestrator::new(gateway, invoker, self.tools, self.config))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
