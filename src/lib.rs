pub mod assessor;
pub mod config;
pub mod error;
pub mod final_answer;
pub mod json_extract;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod placeholder;
pub mod plan;
pub mod plan_builder;
pub mod polling;
pub mod scheduler;
pub mod think_strip;
pub mod tool_invoker;
pub mod types;

mod builder;

// Convenience re-exports at crate root
pub use builder::OrchestratorBuilder;
pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use orchestrator::Orchestrator;
pub use plan::{ExecutionPlan, ExecutionStep};
pub use tool_invoker::ToolInvoker;
pub use types::{
    AssessmentRecord, FinalStateRecord, ProgressRecord, SatisfactionLevel, SolutionLevel,
    StepOutcome, ToolArgs, ToolDescriptor,
};
