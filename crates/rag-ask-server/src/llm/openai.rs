use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::{LineBuffer, SseParser};
use super::{CompletionRequest, CompletionStream, LlmClient, LlmClientConfig, LlmError};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Chat-completions client for OpenAI and any OpenAI-compatible endpoint
/// (vLLM serves the same wire format at a custom base URL).
#[derive(Debug)]
pub struct OpenAiClient {
    client: Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Hosted OpenAI: key required, base URL defaults to the public API.
    pub fn hosted(config: &LlmClientConfig) -> Result<Self, LlmError> {
        if config.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(LlmError::Config("openai requires an api key".to_string()));
        }
        Self::compatible(
            config,
            config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        )
    }

    /// OpenAI-compatible endpoint at an explicit base URL.
    pub fn compatible(config: &LlmClientConfig, base_url: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let response = self.send(request, false).await?;
        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Stream("completion without content".to_string()))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let response = self.send(request, true).await?;
        debug!(model = %self.model, "chat completion stream opened");

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer = LineBuffer::default();
            let mut parser = SseParser::new();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
                for line in buffer.push(&chunk) {
                    if let Some(event) = parser.feed_line(&line) {
                        if event.data == "[DONE]" {
                            break 'outer;
                        }
                        if let Some(text) = delta_text(&event.data) {
                            yield text;
                        }
                    }
                }
            }

            // A final frame may arrive without its trailing blank line.
            if let Some(line) = buffer.flush() {
                if let Some(event) = parser.feed_line(&line) {
                    if event.data != "[DONE]" {
                        if let Some(text) = delta_text(&event.data) {
                            yield text;
                        }
                    }
                }
            }
            if let Some(event) = parser.finish() {
                if event.data != "[DONE]" {
                    if let Some(text) = delta_text(&event.data) {
                        yield text;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn delta_text(data: &str) -> Option<String> {
    let chunk: ChatCompletionChunk = serde_json::from_str(data).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty())
}
