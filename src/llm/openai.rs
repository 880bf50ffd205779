use super::LlmGateway;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;

/// OpenAI-compatible chat completion client — also covers Groq, Together,
/// Fireworks, Ollama's OpenAI shim, and any other provider that speaks the
/// `/v1/chat/completions` wire format.
pub struct OpenAiGateway {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

impl OpenAiGateway {
    /// Standard OpenAI client using the `OPENAI_API_KEY` env var.
    pub fn from_env(model: impl Into<String>) -> Result<Self, String> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| "OPENAI_API_KEY not set".to_string())?;
        Ok(Self::with_base_url("https://api.openai.com", key, model))
    }

    /// Custom base URL — for Groq, Together, Ollama, Fireworks, etc.
    pub fn with_base_url(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: api_base.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String, String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Network error: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("OpenAI API error {status}: {text}"));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| format!("Failed to parse OpenAI response: {e}"))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "Empty response from OpenAI".to_string())
    }

    fn complete_stream<'a>(
        &'a self,
        system_prompt: String,
        user_prompt: String,
        temperature: f32,
    ) -> BoxStream<'a, Result<String, String>> {
        use futures::stream;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &system_prompt },
                ChatMessage { role: "user", content: &user_prompt },
            ],
            temperature,
            stream: true,
        };
        let body = serde_json::to_value(&body).unwrap_or_default();

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let api_base = self.api_base.clone();

        stream::once(async move {
            client
                .post(format!("{api_base}/v1/chat/completions"))
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| format!("Network error: {e}"))
        })
        .flat_map(|res| match res {
            Ok(resp) if resp.status().is_success() => resp
                .bytes_stream()
                .map(|b| b.map_err(|e| format!("Stream error: {e}")))
                .map(|res| {
                    let bytes = res?;
                    let text = String::from_utf8_lossy(&bytes);
                    let mut out = String::new();
                    for line in text.lines() {
                        let Some(data) = line.strip_prefix("data: ") else { continue };
                        if data == "[DONE]" {
                            continue;
                        }
                        if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
                            if let Some(choice) = chunk.choices.into_iter().next() {
                                if let Some(content) = choice.delta.content {
                                    out.push_str(&content);
                                }
                            }
                        }
                    }
                    Ok(out)
                })
                .boxed(),
            Ok(resp) => stream::once(async move {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                Err(format!("OpenAI API error {status}: {text}"))
            })
            .boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        })
        .boxed()
    }
}
