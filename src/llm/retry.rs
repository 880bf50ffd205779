use super::LlmGateway;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Wraps any `LlmGateway` and retries transient failures with exponential
/// back-off, capped at 60s. Auth errors are never retried.
pub struct RetryingLlmGateway {
    inner: Arc<dyn LlmGateway>,
    max_retries: u32,
}

impl RetryingLlmGateway {
    pub fn new(inner: Arc<dyn LlmGateway>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }

    fn is_auth_error(err: &str) -> bool {
        let lower = err.to_lowercase();
        lower.contains("401")
            || lower.contains("403")
            || lower.contains("authentication")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("invalid api key")
    }

    fn is_rate_limit_error(err: &str) -> bool {
        let lower = err.to_lowercase();
        lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    }
}

#[async_trait]
impl LlmGateway for RetryingLlmGateway {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String, String> {
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            match self.inner.complete(system_prompt, user_prompt, temperature).await {
                Ok(content) => return Ok(content),
                Err(e) if Self::is_auth_error(&e) => {
                    tracing::error!(error = %e, "LLM auth error — not retrying");
                    return Err(e);
                }
                Err(e) => {
                    last_err = e.clone();
                    if attempt < self.max_retries {
                        let base_wait = if Self::is_rate_limit_error(&e) { 5 } else { 1 };
                        let wait_secs = std::cmp::min(base_wait << attempt, 60);
                        tracing::warn!(attempt = attempt + 1, max = self.max_retries, wait_s = wait_secs, error = %e, "LLM transient error — retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                    }
                }
            }
        }

        Err(format!("LLM failed after {} retries — last error: {last_err}", self.max_retries))
    }

    fn complete_stream<'a>(
        &'a self,
        system_prompt: String,
        user_prompt: String,
        temperature: f32,
    ) -> BoxStream<'a, Result<String, String>> {
        // A stream that fails mid-flight can't be resumed without losing
        // partial output already forwarded to the caller, so only the initial
        // connection benefits from retrying — delegate straight through.
        self.inner.complete_stream(system_prompt, user_prompt, temperature)
    }
}
