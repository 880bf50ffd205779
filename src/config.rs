use serde::{Deserialize, Serialize};

/// Process-wide tunables, constructed once at startup and shared
/// read-only by every component (§6 of the design).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Outer bound on Scheduler iterations and on Polling Driver iterations per step.
    pub max_iterations: usize,
    /// Cap on how many times a given (prev_step, next_step) pair may be retried.
    pub max_tool_retries: usize,
    /// Timeout for a single tool invocation.
    pub tool_execution_timeout_secs: u64,
    /// Timeout for LLM calls made while selecting/filtering tools or resolving placeholders.
    pub tool_selection_timeout_secs: u64,
    /// Sleep between Polling Driver iterations.
    pub polling_interval_seconds: u64,
    /// Unused by the core; reserved for a future relevance-scoring path.
    pub similarity_threshold: f64,
    /// Directory for optional plan snapshots. `None` disables persistence.
    pub log_dir: Option<std::path::PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_tool_retries: 3,
            tool_execution_timeout_secs: 30,
            tool_selection_timeout_secs: 15,
            polling_interval_seconds: 5,
            similarity_threshold: 0.7,
            log_dir: None,
        }
    }
}
