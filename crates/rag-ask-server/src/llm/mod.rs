pub mod anthropic;
pub mod factory;
pub mod openai;
pub mod sse;
pub mod vllm;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use factory::LlmClientFactory;
pub use sse::{LineBuffer, ParserState, SseEvent, SseParser};

pub const PROVIDER_OPENAI: &str = "openai";
pub const PROVIDER_ANTHROPIC: &str = "anthropic";
pub const PROVIDER_VLLM: &str = "vllm";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmClientConfig {
    /// One of `openai`, `anthropic`, `vllm`. Anything else fails fast at
    /// client construction.
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    pub timeout_ms: u64,
}

fn default_streaming() -> bool {
    true
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM provider misconfigured: {0}")]
    Config(String),

    #[error("LLM provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM stream error: {0}")]
    Stream(String),
}

impl LlmError {
    /// Transient errors may be retried; configuration problems are final.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http { status, .. } => *status == 429 || *status >= 500,
            LlmError::Transport(_) | LlmError::Stream(_) => true,
            LlmError::Config(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Text deltas in provider order.
pub type CompletionStream = BoxStream<'static, Result<String, LlmError>>;

#[async_trait]
pub trait LlmClient: Send + Sync + std::fmt::Debug {
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError>;
}

/// Provider dispatch. Unknown providers fail fast.
pub fn build_client(config: &LlmClientConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        PROVIDER_OPENAI => Ok(Arc::new(openai::OpenAiClient::hosted(config)?)),
        PROVIDER_VLLM => Ok(Arc::new(vllm::build(config)?)),
        PROVIDER_ANTHROPIC => Ok(Arc::new(anthropic::AnthropicClient::new(config)?)),
        other => Err(LlmError::Config(format!("unknown provider '{}'", other))),
    }
}

/// Cheap token estimate for context budgeting: `ceil(len / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> LlmClientConfig {
        LlmClientConfig {
            provider: provider.to_string(),
            model: "m".into(),
            temperature: 0.2,
            max_tokens: 512,
            base_url: Some("http://localhost:8000".into()),
            api_key: Some("key".into()),
            streaming: true,
            timeout_ms: 30_000,
        }
    }

    #[test]
    fn unknown_provider_fails_fast() {
        let err = build_client(&config("watsonx")).unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }

    #[test]
    fn known_providers_build() {
        assert!(build_client(&config("openai")).is_ok());
        assert!(build_client(&config("vllm")).is_ok());
        assert!(build_client(&config("anthropic")).is_ok());
    }

    #[test]
    fn transient_classification() {
        assert!(LlmError::Http {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(LlmError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!LlmError::Http {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!LlmError::Config("bad".into()).is_transient());
    }

    #[test]
    fn token_estimate_is_ceil_len_over_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
