use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fusion::RetrievedChunk;

/// Cross-encoder rerank stage. Implementations are interchangeable; the
/// pipeline treats failure as non-fatal and falls back to fused order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> anyhow::Result<Vec<RetrievedChunk>>;
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    passages: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// Reranker behind an HTTP scoring endpoint: POST `{query, passages}`,
/// response `{scores}` aligned with the passages.
pub struct HttpReranker {
    client: Client,
    url: String,
}

impl HttpReranker {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            url,
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> anyhow::Result<Vec<RetrievedChunk>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let request = RerankRequest {
            query,
            passages: candidates
                .iter()
                .map(|c| c.payload.content.as_str())
                .collect(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: RerankResponse = response.json().await?;
        if body.scores.len() != candidates.len() {
            anyhow::bail!(
                "reranker returned {} scores for {} passages",
                body.scores.len(),
                candidates.len()
            );
        }

        for (candidate, score) in candidates.iter_mut().zip(body.scores) {
            candidate.rerank_score = Some(score.clamp(0.0, 1.0));
        }

        candidates.sort_by(|a, b| {
            let sa = a.rerank_score.unwrap_or(0.0);
            let sb = b.rerank_score.unwrap_or(0.0);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(top_k);
        for (index, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = index + 1;
        }

        debug!(kept = candidates.len(), "reranked candidates");
        Ok(candidates)
    }
}

/// Pass-through used when no reranker is configured.
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> anyhow::Result<Vec<RetrievedChunk>> {
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

/// Deterministic reranker with a fixed score table. Stands in for a real
/// cross-encoder in tests and local development, and can be forced to fail
/// to exercise the pass-through path.
pub struct StaticReranker {
    pub scores: std::collections::HashMap<String, f32>,
    pub fail: bool,
}

#[async_trait]
impl Reranker for StaticReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> anyhow::Result<Vec<RetrievedChunk>> {
        if self.fail {
            anyhow::bail!("reranker unavailable");
        }
        for candidate in candidates.iter_mut() {
            candidate.rerank_score = Some(self.scores.get(&candidate.id).copied().unwrap_or(0.0));
        }
        candidates.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_k);
        for (index, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = index + 1;
        }
        Ok(candidates)
    }
}
