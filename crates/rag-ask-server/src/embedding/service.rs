use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::Chunk;
use crate::text::chunker::{AdaptiveChunker, ChunkScope};
use crate::utils::similarity::l2_normalize;

const HEALTH_CACHE_TTL: Duration = Duration::from_secs(300);
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis((raw as u64).min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    #[serde(default)]
    pub api_key: Option<String>,
    pub max_batch_size: usize,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding service returned {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("payload too large for embedding service")]
    PayloadTooLarge,

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding service transport error: {0}")]
    Transport(String),

    #[error("embedding service returned no vectors")]
    EmptyResponse,

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Http { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            EmbeddingError::Transport(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Per-chunk embedding produced by the document-level API.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub token_count: usize,
    pub start_index: usize,
    pub end_index: usize,
    pub section_path: Option<String>,
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint with batching,
/// backoff retry, and dimension validation. All returned vectors are
/// unit-normalized.
pub struct EmbeddingService {
    client: Client,
    config: EmbeddingConfig,
    chunker: Arc<AdaptiveChunker>,
    health_cache: RwLock<HashMap<String, (bool, Instant)>>,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig, chunker: Arc<AdaptiveChunker>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            config,
            chunker,
            health_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Embed a single text. Texts over the safe token limit are chunked,
    /// embedded, and mean-pooled; this loses detail, so the ingest path
    /// chunk-then-stores instead of calling this with oversized input.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let limit = self.chunker.counter().safe_token_limit();
        if self.chunker.counter().count(text) <= limit {
            let input = [text.to_string()];
            let mut vectors = self.call_with_retry(&input).await?;
            return Ok(vectors.remove(0));
        }

        warn!(
            chars = text.len(),
            "text over token limit, embedding mean of chunks"
        );
        let scope = ChunkScope::new("adhoc", "adhoc");
        let outcome = self.chunker.chunk(text, &scope);
        if outcome.chunks.is_empty() {
            return Err(EmbeddingError::EmptyResponse);
        }
        let texts: Vec<String> = outcome.chunks.into_iter().map(|c| c.text).collect();
        let vectors = self.embed_texts_batched(&texts).await?;
        Ok(mean_vector(&vectors))
    }

    /// Embed a batch, preserving input order. Oversized entries are chunked
    /// and mean-pooled individually.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let limit = self.chunker.counter().safe_token_limit();

        let mut fits: Vec<(usize, String)> = Vec::new();
        let mut oversized: Vec<usize> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if self.chunker.counter().count(text) <= limit {
                fits.push((i, text.clone()));
            } else {
                oversized.push(i);
            }
        }

        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let fit_texts: Vec<String> = fits.iter().map(|(_, t)| t.clone()).collect();
        let fit_vectors = self.embed_texts_batched(&fit_texts).await?;
        for ((i, _), vector) in fits.into_iter().zip(fit_vectors) {
            out[i] = Some(vector);
        }

        for i in oversized {
            out[i] = Some(self.embed(&texts[i]).await?);
        }

        Ok(out.into_iter().map(|v| v.expect("all slots filled")).collect())
    }

    /// Document-level API: chunk the text, embed every chunk, and return the
    /// per-chunk vectors with their placement metadata.
    pub async fn embed_with_chunking(
        &self,
        text: &str,
        tenant: &str,
        document_id: &str,
    ) -> Result<Vec<ChunkEmbedding>, EmbeddingError> {
        let scope = ChunkScope::new(tenant, document_id);
        let outcome = self.chunker.chunk(text, &scope);
        self.embed_chunks(&outcome.chunks).await
    }

    /// Embed pre-chunked content in paced batches of `max_batch_size`.
    pub async fn embed_chunks(
        &self,
        chunks: &[Chunk],
    ) -> Result<Vec<ChunkEmbedding>, EmbeddingError> {
        let mut out = Vec::with_capacity(chunks.len());

        for (batch_index, batch) in chunks.chunks(self.config.max_batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(INTER_BATCH_PAUSE).await;
            }
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.call_with_retry(&texts).await?;
            for (chunk, vector) in batch.iter().zip(vectors) {
                out.push(ChunkEmbedding {
                    chunk_id: chunk.id.clone(),
                    vector,
                    token_count: chunk.token_count,
                    start_index: chunk.start_index,
                    end_index: chunk.end_index,
                    section_path: chunk.section_path.clone(),
                });
            }
        }

        Ok(out)
    }

    /// Service liveness, cached for five minutes per URL.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));

        {
            let cache = self.health_cache.read().await;
            if let Some((healthy, at)) = cache.get(&url) {
                if at.elapsed() < HEALTH_CACHE_TTL {
                    return *healthy;
                }
            }
        }

        let healthy = match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "embedding health check failed");
                false
            }
        };

        self.health_cache
            .write()
            .await
            .insert(url, (healthy, Instant::now()));
        healthy
    }

    /// Split large inputs into service-sized batches, pacing between calls.
    async fn embed_texts_batched(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.config.max_batch_size.max(1)).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(INTER_BATCH_PAUSE).await;
            }
            out.extend(self.call_with_retry(batch).await?);
        }
        Ok(out)
    }

    /// One service call with exponential backoff. 413 is never retried: the
    /// caller re-chunks instead.
    async fn call_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_error = String::new();
        for attempt in 0..self.config.retry.max_attempts {
            if attempt > 0 {
                let delay = self.config.retry.delay_for(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying embedding call");
                tokio::time::sleep(delay).await;
            }

            match self.call_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "embedding call failed, will retry");
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(EmbeddingError::RetriesExhausted {
            attempts: self.config.retry.max_attempts,
            last: last_error,
        })
    }

    async fn call_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!(
            "{}/v1/embeddings",
            self.config.base_url.trim_end_matches('/')
        );
        let request = EmbeddingsRequest {
            input: texts,
            model: &self.config.model,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(EmbeddingError::PayloadTooLarge);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http { status, body });
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        if body.data.len() != texts.len() {
            return Err(EmbeddingError::EmptyResponse);
        }

        let mut vectors = Vec::with_capacity(body.data.len());
        for data in body.data {
            let mut vector = data.embedding;
            if vector.len() != self.config.dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.config.dimensions,
                    got: vector.len(),
                });
            }
            l2_normalize(&mut vector);
            vectors.push(vector);
        }

        Ok(vectors)
    }
}

#[async_trait::async_trait]
impl super::Embedder for EmbeddingService {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        EmbeddingService::embed(self, text).await
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<ChunkEmbedding>, EmbeddingError> {
        EmbeddingService::embed_chunks(self, chunks).await
    }
}

/// Mean of unit vectors, re-normalized.
fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    if vectors.is_empty() {
        return Vec::new();
    }
    let dim = vectors[0].len();
    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    for m in mean.iter_mut() {
        *m /= n;
    }
    l2_normalize(&mut mean);
    mean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 500,
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for(3), Duration::from_millis(500));
        assert_eq!(retry.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn retryable_classification() {
        assert!(EmbeddingError::Http {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new()
        }
        .is_retryable());
        assert!(EmbeddingError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new()
        }
        .is_retryable());
        assert!(EmbeddingError::Transport("reset".into()).is_retryable());
        assert!(!EmbeddingError::PayloadTooLarge.is_retryable());
        assert!(!EmbeddingError::DimensionMismatch {
            expected: 768,
            got: 384
        }
        .is_retryable());
        assert!(!EmbeddingError::Http {
            status: StatusCode::BAD_REQUEST,
            body: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn mean_vector_is_unit_norm() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let mean = mean_vector(&vectors);
        let norm: f32 = mean.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((mean[0] - mean[1]).abs() < 1e-6);
    }

    #[test]
    fn mean_of_empty_is_empty() {
        assert!(mean_vector(&[]).is_empty());
    }
}
