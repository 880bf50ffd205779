use async_trait::async_trait;
use futures::stream::BoxStream;

mod anthropic;
mod mock;
mod openai;
mod retry;

pub use anthropic::AnthropicGateway;
pub use mock::MockLlmGateway;
pub use openai::OpenAiGateway;
pub use retry::RetryingLlmGateway;

/// The single interface between every component in this crate (Plan Builder,
/// Placeholder Resolver, Assessor, Polling Driver, Final Answer Generator)
/// and any LLM provider. Unlike a tool-calling agent loop, nothing here ever
/// needs function-call schemas — every interaction is a plain chat completion
/// whose content is expected to carry JSON or free text, parsed by the caller.
///
/// # Contract
/// - Send + Sync (held behind `Arc<dyn LlmGateway>`)
/// - Returns `Err` only for unrecoverable failures: network failure after
///   retries exhausted, authentication failure, an empty/malformed response.
/// - Recoverable weirdness (a response that doesn't parse as the expected
///   JSON shape) is NOT this trait's problem — callers run it through
///   `json_extract` and fall back to a conservative default themselves.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String, String>;

    /// Streams content chunks for the Final Answer Generator. Prompts are
    /// owned so the returned stream doesn't need to borrow from a
    /// caller-local string — only the gateway itself is borrowed.
    fn complete_stream<'a>(
        &'a self,
        system_prompt: String,
        user_prompt: String,
        temperature: f32,
    ) -> BoxStream<'a, Result<String, String>>;
}
