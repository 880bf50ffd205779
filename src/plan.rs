use crate::types::ToolArgs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Mutable state record, created by the Plan Builder, mutated only by the
/// Scheduler (§3). `tool_args` values may still contain `[placeholder]`
/// tokens until the Placeholder Resolver runs for this step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: String,
    pub tool_name: String,
    pub tool_args: ToolArgs,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parallel_group: Option<String>,

    #[serde(default)]
    pub polling_required: bool,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default)]
    pub polling_condition: String,
    #[serde(default)]
    pub polling_iteration: usize,

    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

fn default_polling_interval() -> u64 {
    5
}

impl ExecutionStep {
    pub fn new(step_id: impl Into<String>, tool_name: impl Into<String>, tool_args: ToolArgs) -> Self {
        Self {
            step_id: step_id.into(),
            tool_name: tool_name.into(),
            tool_args,
            description: String::new(),
            depends_on: Vec::new(),
            parallel_group: None,
            polling_required: false,
            polling_interval: 5,
            polling_condition: String::new(),
            polling_iteration: 0,
            executed: false,
            success: None,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    /// Text of whichever of `result`/`error` is populated — the empty string
    /// before the step has run.
    pub fn result_text(&self) -> &str {
        self.result.as_deref().or(self.error.as_deref()).unwrap_or_default()
    }
}

/// Mutable collection of `ExecutionStep`s, built once by the Plan Builder and
/// driven to completion by the Scheduler (§3). Exclusively owned by the
/// Orchestrator for the duration of one query — plans never share state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub user_query: String,
    pub steps: HashMap<String, ExecutionStep>,
    pub parallel_groups: HashMap<String, Vec<String>>,
    pub creation_time: DateTime<Utc>,
    pub completed: bool,
}

impl ExecutionPlan {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            steps: HashMap::new(),
            parallel_groups: HashMap::new(),
            creation_time: Utc::now(),
            completed: false,
        }
    }

    pub fn add_step(&mut self, step: ExecutionStep) {
        if let Some(group) = &step.parallel_group {
            self.parallel_groups.entry(group.clone()).or_default().push(step.step_id.clone());
        }
        self.steps.insert(step.step_id.clone(), step);
    }

    /// Steps whose every dependency is already executed, and which haven't run yet.
    pub fn ready_steps(&self) -> Vec<&ExecutionStep> {
        let executed: HashSet<&str> = self
            .steps
            .values()
            .filter(|s| s.executed)
            .map(|s| s.step_id.as_str())
            .collect();

        self.steps
            .values()
            .filter(|s| !s.executed && s.depends_on.iter().all(|d| executed.contains(d.as_str())))
            .collect()
    }

    /// Groups ready steps into batches (§4.4.2): a parallel group only forms a
    /// batch once *every* member of that group is simultaneously ready —
    /// never a partial subset. Steps with no `parallel_group` form their own
    /// singleton batch.
    pub fn parallel_ready_groups(&self) -> Vec<Vec<String>> {
        let ready = self.ready_steps();
        let mut by_group: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut singletons: Vec<Vec<String>> = Vec::new();

        for step in &ready {
            match &step.parallel_group {
                Some(g) => by_group.entry(g.as_str()).or_default().push(step.step_id.as_str()),
                None => singletons.push(vec![step.step_id.clone()]),
            }
        }

        let mut batches = Vec::new();
        for (group, ids) in by_group {
            let expected = self.parallel_groups.get(group).map(|v| v.len()).unwrap_or(0);
            if ids.len() == expected {
                batches.push(ids.into_iter().map(str::to_string).collect());
            }
        }
        batches.extend(singletons);
        batches
    }

    pub fn update_step_result(&mut self, step_id: &str, success: bool, result: Option<String>, error: Option<String>) {
        if let Some(step) = self.steps.get_mut(step_id) {
            step.executed = true;
            step.success = Some(success);
            step.result = result;
            step.error = error;
            step.end_time = Some(Utc::now());
        }
    }

    pub fn is_completed(&self) -> bool {
        self.steps.values().all(|s| s.executed)
    }

    /// Ordered-by-insertion isn't meaningful for a `HashMap`; callers that need
    /// execution order track it themselves (the Scheduler's `executed_tools`
    /// list). This returns every executed step's result text, keyed by id,
    /// for feeding the Final Answer Generator and final-state Assessor.
    pub fn execution_results(&self) -> HashMap<String, (bool, String)> {
        self.steps
            .values()
            .filter(|s| s.executed)
            .map(|s| (s.step_id.clone(), (s.success.unwrap_or(false), s.result_text().to_string())))
            .collect()
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).unwrap_or_default();
        std::fs::write(path, json)
    }

    pub fn load_from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Human-readable rendering used for progress output and debug snapshots.
    pub fn todo_list(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# 执行计划: {}\n", self.user_query));
        out.push_str(&format!("# 创建时间: {}\n\n", self.creation_time.to_rfc3339()));

        let mut executed: HashSet<String> = HashSet::new();
        let mut remaining: HashSet<String> = self.steps.keys().cloned().collect();
        let mut ordered_ids: Vec<String> = Vec::new();

        while !remaining.is_empty() {
            let mut next_ids: Vec<String> = remaining
                .iter()
                .filter(|id| {
                    self.steps[*id].depends_on.iter().all(|d| executed.contains(d))
                })
                .cloned()
                .collect();
            if next_ids.is_empty() {
                break;
            }
            next_ids.sort();
            for id in &next_ids {
                executed.insert(id.clone());
                remaining.remove(id);
                ordered_ids.push(id.clone());
            }
        }

        for (i, id) in ordered_ids.iter().enumerate() {
            let step = &self.steps[id];
            let status = if step.executed { "✓" } else { "□" };
            let label = if step.description.is_empty() { &step.tool_name } else { &step.description };
            out.push_str(&format!("{}. [{}] {} (ID: {})\n", i + 1, status, label, id));
            out.push_str(&format!("   工具: {}\n", step.tool_name));
            out.push_str(&format!("   参数: {}\n", serde_json::to_string(&step.tool_args).unwrap_or_default()));
            if step.executed {
                let ok = step.success.unwrap_or(false);
                out.push_str(&format!("   结果: {}\n", if ok { "成功" } else { "失败" }));
                out.push_str(&format!("   详情: {}\n", step.result_text()));
            }
            out.push('\n');
        }
        out
    }
}
