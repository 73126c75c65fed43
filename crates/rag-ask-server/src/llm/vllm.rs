use super::openai::OpenAiClient;
use super::{LlmClientConfig, LlmError};

/// vLLM speaks the OpenAI chat-completions wire format; the only difference
/// is that the base URL is mandatory and an API key usually is not.
pub fn build(config: &LlmClientConfig) -> Result<OpenAiClient, LlmError> {
    let base_url = config
        .base_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| LlmError::Config("vllm requires a base url".to_string()))?;
    OpenAiClient::compatible(config, base_url)
}
