pub mod fusion;
pub mod keyword;
pub mod reranker;
pub mod vector;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::models::UserContext;
use crate::utils::error::ApiError;

pub use fusion::{fuse, RetrievedChunk, RrfConfig, SearchType};
pub use keyword::KeywordSearchAdapter;
pub use reranker::{HttpReranker, NoopReranker, Reranker, StaticReranker};
pub use vector::{VectorSearchAdapter, VectorSearchConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub embed_timeout_seconds: u64,
    pub search_timeout_seconds: u64,
    pub rerank_timeout_seconds: u64,
    #[serde(default)]
    pub rrf: RrfConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 12,
            embed_timeout_seconds: 10,
            search_timeout_seconds: 15,
            rerank_timeout_seconds: 10,
            rrf: RrfConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub results: Vec<RetrievedChunk>,
    pub warnings: Vec<String>,
}

/// Query-time retrieval: embed, fan out dense and lexical search, fuse with
/// RRF, optionally rerank. One degraded source downgrades to single-source
/// results with a warning; losing both is an error.
pub struct RetrievalService {
    embedding: Arc<dyn Embedder>,
    vector: VectorSearchAdapter,
    keyword: KeywordSearchAdapter,
    reranker: Arc<dyn Reranker>,
    config: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(
        embedding: Arc<dyn Embedder>,
        vector: VectorSearchAdapter,
        keyword: KeywordSearchAdapter,
        reranker: Arc<dyn Reranker>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedding,
            vector,
            keyword,
            reranker,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        ctx: &UserContext,
        top_k: Option<usize>,
    ) -> Result<RetrievalOutcome, ApiError> {
        let top_k = top_k.unwrap_or(self.config.top_k).max(1);
        // Wider candidate pool feeds fusion and rerank before truncation.
        let fetch = top_k * 2;
        let mut warnings = Vec::new();

        let query_vector = tokio::time::timeout(
            Duration::from_secs(self.config.embed_timeout_seconds),
            self.embedding.embed(query),
        )
        .await
        .map_err(|_| ApiError::Timeout("query embedding".to_string()))?
        .map_err(|e| ApiError::UpstreamUnavailable(format!("query embedding: {}", e)))?;

        let search_deadline = Duration::from_secs(self.config.search_timeout_seconds);
        let (vector_result, keyword_result) = tokio::join!(
            tokio::time::timeout(
                search_deadline,
                self.vector.search(query_vector, query, ctx, fetch),
            ),
            tokio::time::timeout(search_deadline, self.keyword.search(query, ctx, fetch)),
        );

        let (vector_points, vector_failed) = match vector_result {
            Ok(Ok(points)) => (points, false),
            Ok(Err(e)) => {
                warn!(error = %e, "vector search failed");
                warnings.push(format!("vector search failed: {}", e));
                (Vec::new(), true)
            }
            Err(_) => {
                warn!("vector search timed out");
                warnings.push("vector search timed out".to_string());
                (Vec::new(), true)
            }
        };

        let (keyword_points, keyword_failed) = match keyword_result {
            Ok(Ok(points)) => (points, false),
            Ok(Err(e)) => {
                warn!(error = %e, "keyword search failed");
                warnings.push(format!("keyword search failed: {}", e));
                (Vec::new(), true)
            }
            Err(_) => {
                warn!("keyword search timed out");
                warnings.push("keyword search timed out".to_string());
                (Vec::new(), true)
            }
        };

        if vector_failed && keyword_failed {
            return Err(ApiError::UpstreamUnavailable(
                "both search backends unavailable".to_string(),
            ));
        }

        let fused = fuse(vector_points, keyword_points, &self.config.rrf);
        debug!(candidates = fused.len(), "fused results");

        let results = match tokio::time::timeout(
            Duration::from_secs(self.config.rerank_timeout_seconds),
            self.reranker.rerank(query, fused.clone(), top_k),
        )
        .await
        {
            Ok(Ok(reranked)) => reranked,
            Ok(Err(e)) => {
                // Non-fatal: fused order passes through.
                warn!(error = %e, "reranker failed, using fused order");
                warnings.push(format!("reranker failed: {}", e));
                truncate_fused(fused, top_k)
            }
            Err(_) => {
                warn!("reranker timed out, using fused order");
                warnings.push("reranker timed out".to_string());
                truncate_fused(fused, top_k)
            }
        };

        Ok(RetrievalOutcome { results, warnings })
    }
}

fn truncate_fused(mut fused: Vec<RetrievedChunk>, top_k: usize) -> Vec<RetrievedChunk> {
    fused.truncate(top_k);
    fused
}
