use std::collections::HashMap;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::embedding::{EmbeddingConfig, RetryConfig};
use crate::guardrail::TenantGuardrailConfig;
use crate::llm::LlmClientConfig;
use crate::packing::PackingConfig;
use crate::search::{RetrievalConfig, VectorSearchConfig};
use crate::security::RateLimitConfig;
use crate::synthesis::SynthesisConfig;
use crate::text::token_counter::{TokenizerKind, TokenizerSpec};
use crate::text::ChunkStrategy;
use crate::vectorstore::QdrantStoreConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub vector_store: VectorStoreSettings,
    pub embedding: EmbeddingSettings,
    pub llm: LlmClientConfig,
    pub retrieval: RetrievalConfig,
    pub vector_search: VectorSearchConfig,
    pub reranker: RerankerSettings,
    pub packing: PackingConfig,
    pub synthesis: SynthesisConfig,
    pub guardrail: HashMap<String, TenantGuardrailConfig>,
    pub rate_limit: RateLimitConfig,
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    pub url: String,
    pub collection: String,
    pub concurrency_limit: usize,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            collection: "chunks".to_string(),
            concurrency_limit: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub max_tokens: usize,
    pub safety_margin: f64,
    pub char_to_token_ratio: Option<f32>,
    pub chunking_strategy: Option<ChunkStrategy>,
    pub overlap_tokens: usize,
    pub max_batch_size: usize,
    pub timeout_seconds: u64,
    pub retry: RetryConfig,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "bge-m3".to_string(),
            base_url: "http://localhost:8081".to_string(),
            api_key: None,
            dimensions: 1024,
            max_tokens: 8192,
            safety_margin: 0.1,
            char_to_token_ratio: None,
            chunking_strategy: None,
            overlap_tokens: 0,
            max_batch_size: 16,
            timeout_seconds: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl EmbeddingSettings {
    /// Tokenizer identity for the chunking/counting side of this model.
    pub fn tokenizer_spec(&self) -> TokenizerSpec {
        let kind = match self.provider.as_str() {
            "openai" => TokenizerKind::Tiktoken,
            "custom" => TokenizerKind::Custom,
            _ => TokenizerKind::Transformers,
        };
        TokenizerSpec {
            model: self.model.clone(),
            kind,
            max_tokens: self.max_tokens,
            safety_margin: self.safety_margin,
            char_to_token_ratio: self.char_to_token_ratio,
        }
    }

    pub fn client_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            api_key: self.api_key.clone(),
            max_batch_size: self.max_batch_size,
            timeout_seconds: self.timeout_seconds,
            retry: self.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    pub url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub token: Option<String>,
    pub min_content_length: usize,
    pub max_content_length: usize,
    pub duplicate_threshold: f32,
    pub repeat_table_header: bool,
    pub stats_dir: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            token: None,
            min_content_length: 10,
            max_content_length: 10_000,
            duplicate_threshold: 0.8,
            repeat_table_header: true,
            stats_dir: "data/corpus-stats".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            vector_store: VectorStoreSettings::default(),
            embedding: EmbeddingSettings::default(),
            llm: LlmClientConfig {
                provider: "vllm".to_string(),
                model: "qwen2.5-7b-instruct".to_string(),
                temperature: 0.2,
                max_tokens: 1024,
                base_url: Some("http://localhost:8000".to_string()),
                api_key: None,
                streaming: true,
                timeout_ms: 120_000,
            },
            retrieval: RetrievalConfig::default(),
            vector_search: VectorSearchConfig::default(),
            reranker: RerankerSettings::default(),
            packing: PackingConfig::default(),
            synthesis: SynthesisConfig::default(),
            guardrail: HashMap::new(),
            rate_limit: RateLimitConfig::default(),
            ingest: IngestSettings::default(),
        }
    }
}

impl Settings {
    /// Layered load: `config/settings.toml` when present, `APP__`-prefixed
    /// environment, then the flat environment names, which always win.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_flat_env();
        Ok(settings)
    }

    pub fn store_config(&self) -> QdrantStoreConfig {
        QdrantStoreConfig {
            url: self.vector_store.url.clone(),
            collection: self.vector_store.collection.clone(),
            vector_dim: self.embedding.dimensions,
            concurrency_limit: self.vector_store.concurrency_limit,
        }
    }

    fn apply_flat_env(&mut self) {
        read_env("LLM_PROVIDER", &mut self.llm.provider);
        read_env("LLM_MODEL", &mut self.llm.model);
        read_env_opt("LLM_ENDPOINT", &mut self.llm.base_url);
        read_env_parsed("LLM_TIMEOUT_MS", &mut self.llm.timeout_ms);
        read_env_parsed("LLM_STREAMING", &mut self.llm.streaming);

        read_env("EMBEDDING_PROVIDER", &mut self.embedding.provider);
        read_env("EMBEDDING_MODEL", &mut self.embedding.model);
        read_env("EMBEDDING_URL", &mut self.embedding.base_url);
        read_env_parsed("EMBEDDING_MAX_TOKENS", &mut self.embedding.max_tokens);
        read_env_parsed("VECTOR_DIM", &mut self.embedding.dimensions);
        if let Ok(value) = std::env::var("EMBEDDING_CHUNKING_STRATEGY") {
            self.embedding.chunking_strategy = match value.as_str() {
                "token-aware" => Some(ChunkStrategy::TokenAware),
                "paragraph-aware" => Some(ChunkStrategy::ParagraphAware),
                "character-based" => Some(ChunkStrategy::CharacterBased),
                _ => self.embedding.chunking_strategy,
            };
        }
        read_env_parsed("EMBEDDING_OVERLAP_TOKENS", &mut self.embedding.overlap_tokens);
        read_env_parsed("EMBEDDING_SAFETY_MARGIN", &mut self.embedding.safety_margin);

        read_env_parsed("CONTEXT_TOKEN_BUDGET", &mut self.packing.token_budget);
        read_env_parsed("PACKING_PER_DOC_CAP", &mut self.packing.per_doc_cap);
        read_env_parsed("PACKING_PER_SECTION_CAP", &mut self.packing.per_section_cap);
        read_env_parsed("PACKING_NOVELTY_ALPHA", &mut self.packing.novelty_alpha);
        read_env_parsed(
            "PACKING_ANSWERABILITY_BONUS",
            &mut self.packing.answerability_bonus,
        );
        read_env_parsed(
            "SECTION_REUNIFICATION",
            &mut self.packing.section_reunification,
        );

        read_env_parsed("RATE_LIMIT_PER_IP", &mut self.rate_limit.per_ip);
        read_env_parsed("RATE_LIMIT_PER_USER", &mut self.rate_limit.per_user);
        read_env_parsed("RATE_LIMIT_PER_TENANT", &mut self.rate_limit.per_tenant);
        read_env_parsed(
            "RATE_LIMIT_WINDOW_MINUTES",
            &mut self.rate_limit.window_minutes,
        );

        if let Ok(value) = std::env::var("INGEST_TOKEN") {
            if !value.trim().is_empty() {
                self.ingest.token = Some(value);
            }
        }
        if let Ok(value) = std::env::var("QDRANT_URL") {
            self.vector_store.url = value;
        }
        if let Ok(value) = std::env::var("QDRANT_COLLECTION") {
            self.vector_store.collection = value;
        }
    }
}

fn read_env(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        if !value.trim().is_empty() {
            *target = value;
        }
    }
}

fn read_env_opt(name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(name) {
        if !value.trim().is_empty() {
            *target = Some(value);
        }
    }
}

fn read_env_parsed<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        if let Ok(parsed) = value.parse::<T>() {
            *target = parsed;
        }
    }
}
