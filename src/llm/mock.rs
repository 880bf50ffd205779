use super::LlmGateway;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Mutex;

/// Programmable gateway for tests: returns queued responses in order, or an
/// error once the queue is exhausted.
pub struct MockLlmGateway {
    responses: Mutex<Vec<String>>,
    call_log: Mutex<Vec<String>>,
}

impl MockLlmGateway {
    pub fn new(responses: Vec<String>) -> Self {
        Self { responses: Mutex::new(responses), call_log: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    pub fn prompt_for_call(&self, n: usize) -> Option<String> {
        self.call_log.lock().unwrap().get(n).cloned()
    }
}

#[async_trait]
impl LlmGateway for MockLlmGateway {
    async fn complete(&self, _system_prompt: &str, user_prompt: &str, _temperature: f32) -> Result<String, String> {
        self.call_log.lock().unwrap().push(user_prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err("MockLlmGateway: no more programmed responses".to_string());
        }
        Ok(responses.remove(0))
    }

    fn complete_stream<'a>(
        &'a self,
        system_prompt: String,
        user_prompt: String,
        temperature: f32,
    ) -> BoxStream<'a, Result<String, String>> {
        use futures::{stream, FutureExt};
        stream::once(async move { self.complete(&system_prompt, &user_prompt, temperature).await }.boxed()).boxed()
    }
}
