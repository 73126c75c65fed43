use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::{LineBuffer, SseParser};
use super::{CompletionRequest, CompletionStream, LlmClient, LlmClientConfig, LlmError};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    system: &'a str,
    messages: Vec<UserMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

/// Client for the Anthropic messages endpoint.
#[derive(Debug)]
pub struct AnthropicClient {
    client: Client,
    model: String,
    base_url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(config: &LlmClientConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LlmError::Config("anthropic requires an api key".to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: vec![UserMessage {
                role: "user",
                content: &request.user,
            }],
            temperature: request.temperature,
            stream,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
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
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let response = self.send(request, false).await?;
        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let text: String = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(LlmError::Stream("message without text content".to_string()));
        }
        Ok(text)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let response = self.send(request, true).await?;
        debug!(model = %self.model, "messages stream opened");

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer = LineBuffer::default();
            let mut parser = SseParser::new();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
                for line in buffer.push(&chunk) {
                    if let Some(event) = parser.feed_line(&line) {
                        match frame_text(&event.data) {
                            FrameOutcome::Text(text) => yield text,
                            FrameOutcome::Stop => break 'outer,
                            FrameOutcome::Skip => {}
                        }
                    }
                }
            }

            if let Some(line) = buffer.flush() {
                if let Some(event) = parser.feed_line(&line) {
                    if let FrameOutcome::Text(text) = frame_text(&event.data) {
                        yield text;
                    }
                }
            }
            if let Some(event) = parser.finish() {
                if let FrameOutcome::Text(text) = frame_text(&event.data) {
                    yield text;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

enum FrameOutcome {
    Text(String),
    Stop,
    Skip,
}

fn frame_text(data: &str) -> FrameOutcome {
    let Ok(frame) = serde_json::from_str::<StreamFrame>(data) else {
        return FrameOutcome::Skip;
    };
    match frame.frame_type.as_str() {
        "content_block_delta" => frame
            .delta
            .and_then(|d| d.text)
            .filter(|t| !t.is_empty())
            .map(FrameOutcome::Text)
            .unwrap_or(FrameOutcome::Skip),
        "message_stop" => FrameOutcome::Stop,
        _ => FrameOutcome::Skip,
    }
}
