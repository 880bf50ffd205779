use thiserror::Error;

/// Errors that cross the crate boundary.
///
/// Recoverable conditions — a tool timing out, a step failing, an LLM
/// response that didn't parse — are never represented here; they become
/// plain data (`StepOutcome`, a parse fallback, a conservative default)
/// so the scheduler can keep going. This enum is reserved for the cases
/// the error handling design says must actually abort the query.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("LLM gateway unavailable: {0}")]
    Gateway(String),

    #[error("tool invoker unavailable: {0}")]
    ToolInvoker(String),

    #[error("build error: {0}")]
    Build(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}
