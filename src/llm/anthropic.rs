use super::LlmGateway;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;

pub struct AnthropicGateway {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

#[derive(serde::Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(serde::Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: StreamDelta },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

impl AnthropicGateway {
    pub fn from_env(model: impl Into<String>) -> Result<Self, String> {
        let key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| "ANTHROPIC_API_KEY not set".to_string())?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: key,
            api_base: "https://api.anthropic.com".to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl LlmGateway for AnthropicGateway {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String, String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: 4096,
            system: system_prompt,
            messages: vec![AnthropicMessage { role: "user", content: user_prompt }],
            temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Network error: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Anthropic API error {status}: {text}"));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| format!("Failed to parse Anthropic response: {e}"))?;
        parsed
            .content
            .into_iter()
            .find_map(|b| match b {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| "Anthropic returned empty content".to_string())
    }

    fn complete_stream<'a>(
        &'a self,
        system_prompt: String,
        user_prompt: String,
        temperature: f32,
    ) -> BoxStream<'a, Result<String, String>> {
        use futures::stream;

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: 4096,
            system: &system_prompt,
            messages: vec![AnthropicMessage { role: "user", content: &user_prompt }],
            temperature,
            stream: true,
        };
        let body = serde_json::to_value(&body).unwrap_or_default();

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let api_base = self.api_base.clone();

        stream::once(async move {
            client
                .post(format!("{api_base}/v1/messages"))
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
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
                        if let Ok(StreamEvent::ContentBlockDelta { delta: StreamDelta::TextDelta { text } }) =
                            serde_json::from_str::<StreamEvent>(data)
                        {
                            out.push_str(&text);
                        }
                    }
                    Ok(out)
                })
                .boxed(),
            Ok(resp) => stream::once(async move {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                Err(format!("Anthropic API error {status}: {text}"))
            })
            .boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        })
        .boxed()
    }
}
