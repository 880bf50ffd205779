use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tool as advertised by the external catalog loader: immutable, shared
/// read-only by every component in this crate. The `session` field names
/// which tool-server session owns it — invocation itself goes through
/// `ToolInvoker`, keyed by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
    pub session: String,
}

/// `satisfaction_level` as reported by the per-step Assessor, collapsed to the
/// three buckets the original prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionLevel {
    Full,
    Partial,
    None,
}

impl SatisfactionLevel {
    /// Maps the Chinese phrases the LLM is asked to return onto the three buckets.
    pub fn from_phrase(s: &str) -> Self {
        if s.contains("满足全部") {
            SatisfactionLevel::Full
        } else if s.contains("满足部分") {
            SatisfactionLevel::Partial
        } else {
            SatisfactionLevel::None
        }
    }
}

/// Immutable judgment returned by the Assessor over a single step (§4.6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub satisfaction_level: SatisfactionLevel,
    pub confidence: f64,
    pub reason: String,
    pub problem_solved: bool,
    pub need_more_tools: bool,
    pub tool_failed: bool,
    pub next_tool_suggestion: Option<String>,
}

impl AssessmentRecord {
    /// The conservative fallback used whenever the LLM response can't be parsed at all.
    pub fn default_on_parse_failure(reason: impl Into<String>) -> Self {
        Self {
            satisfaction_level: SatisfactionLevel::None,
            confidence: 0.5,
            reason: reason.into(),
            problem_solved: false,
            need_more_tools: true,
            tool_failed: false,
            next_tool_suggestion: None,
        }
    }
}

/// `solution_level` as reported by the final-state Assessor (§4.6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionLevel {
    Solved,
    Partial,
    Unsolved,
}

impl SolutionLevel {
    pub fn from_phrase(s: &str) -> Self {
        if s.contains("已解决") {
            SolutionLevel::Solved
        } else if s.contains("部分解决") {
            SolutionLevel::Partial
        } else {
            SolutionLevel::Unsolved
        }
    }
}

/// Assessor output over an entire plan (§4.6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalStateRecord {
    pub problem_solved: bool,
    pub solution_level: SolutionLevel,
    pub confidence: f64,
    pub reason: String,
    pub need_more_tools: bool,
    pub generate_final: bool,
    pub remaining_tasks: Option<Vec<String>>,
}

impl FinalStateRecord {
    pub fn no_tools_executed() -> Self {
        Self {
            problem_solved: false,
            solution_level: SolutionLevel::Unsolved,
            confidence: 0.0,
            reason: "没有执行任何工具".to_string(),
            need_more_tools: false,
            generate_final: true,
            remaining_tasks: None,
        }
    }

    pub fn default_on_error(reason: impl Into<String>) -> Self {
        Self {
            problem_solved: false,
            solution_level: SolutionLevel::Unsolved,
            confidence: 0.0,
            reason: reason.into(),
            need_more_tools: false,
            generate_final: true,
            remaining_tasks: None,
        }
    }

    /// The async-task override mandated by §4.6.2: force `need_more_tools`
    /// when the assessor otherwise gave up but the last result still looks
    /// like an in-flight job.
    pub fn apply_async_override(&mut self, last_result_text: &str) {
        if self.problem_solved || self.need_more_tools {
            return;
        }
        const ASYNC_MARKERS: [&str; 6] = ["任务ID", "进度", "生成中", "处理中", "等待", "排队中"];
        if ASYNC_MARKERS.iter().any(|m| last_result_text.contains(m)) {
            self.need_more_tools = true;
            self.reason.push_str(" (检测到异步任务仍在进行中)");
        }
    }
}

/// Outcome of running one step, including a polling step (§4.4.1 / §4.5).
/// Never a `Result` the caller must unwrap — failure here is ordinary data,
/// the same way this codebase's state machine reports recoverable failure
/// as an event rather than propagating `Err`.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub polling_iterations: usize,
}

impl StepOutcome {
    pub fn ok(result: impl Into<String>) -> Self {
        Self { success: true, result: Some(result.into()), error: None, polling_iterations: 0 }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, result: None, error: Some(error.into()), polling_iterations: 0 }
    }

    /// Ground-truth failure contract with the Tool Invoker (§9 design notes):
    /// a result is failing if it raised, or if its text carries this substring.
    pub fn from_invoker_text(text: String) -> Self {
        if text.contains("isError=True") {
            Self { success: false, result: None, error: Some(text), polling_iterations: 0 }
        } else {
            Self { success: true, result: Some(text), error: None, polling_iterations: 0 }
        }
    }

    pub fn text(&self) -> &str {
        self.result.as_deref().or(self.error.as_deref()).unwrap_or_default()
    }
}

/// Progress output schema (§6): either a plain line or a structured record.
/// The Orchestrator flattens this into the caller's text stream; tests
/// assert against the typed variants directly instead of parsing rendered text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressRecord {
    Line(String),
    Structured {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_assessment: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        should_generate_final: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_summary: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_failure: Option<bool>,
    },
}

impl ProgressRecord {
    pub fn line(s: impl Into<String>) -> Self {
        ProgressRecord::Line(s.into())
    }

    pub fn terminal(should_generate_final: bool, final_failure: bool) -> Self {
        ProgressRecord::Structured {
            message: None,
            tool_name: None,
            final_assessment: None,
            should_generate_final: Some(should_generate_final),
            final_summary: None,
            error: None,
            final_failure: Some(final_failure),
        }
    }

    /// Flattens this record into plain text for a caller that just wants a token stream.
    pub fn flatten(&self) -> String {
        match self {
            ProgressRecord::Line(s) => s.clone(),
            ProgressRecord::Structured { message, final_summary, error, .. } => message
                .clone()
                .or_else(|| final_summary.clone())
                .or_else(|| error.clone())
                .unwrap_or_default(),
        }
    }
}

/// Messages and tool-argument maps both flow through the crate as
/// `serde_json::Value` to stay faithful to the dynamic-JSON design note —
/// this alias just documents intent at call sites.
pub type ToolArgs = HashMap<String, serde_json::Value>;
