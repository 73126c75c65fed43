use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::UserContext;
use crate::vectorstore::{AccessFilter, ScoredPoint, StoreError, VectorQuery, VectorStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchConfig {
    pub base_ef: u64,
    pub min_ef: u64,
    pub max_ef: u64,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            base_ef: 128,
            min_ef: 64,
            max_ef: 512,
        }
    }
}

/// Dense search against the vector store with the mandatory tenant+ACL
/// filter and an HNSW `ef` widened for longer queries.
pub struct VectorSearchAdapter {
    store: Arc<dyn VectorStore>,
    config: VectorSearchConfig,
}

impl VectorSearchAdapter {
    pub fn new(store: Arc<dyn VectorStore>, config: VectorSearchConfig) -> Self {
        Self { store, config }
    }

    /// `ef = clamp(base * (1 + min(words/10, 1)), min_ef, max_ef)`
    pub fn adaptive_ef(&self, query_text: &str) -> u64 {
        let words = query_text.split_whitespace().count() as f64;
        let scale = 1.0 + (words / 10.0).min(1.0);
        let ef = (self.config.base_ef as f64 * scale) as u64;
        ef.clamp(self.config.min_ef, self.config.max_ef)
    }

    pub async fn search(
        &self,
        query_vector: Vec<f32>,
        query_text: &str,
        ctx: &UserContext,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let ef = self.adaptive_ef(query_text);
        debug!(ef, limit, "vector search");

        self.store
            .search(VectorQuery {
                vector: query_vector,
                limit,
                ef: Some(ef),
                filter: AccessFilter {
                    tenant: ctx.tenant_id.clone(),
                    principals: ctx.principals(),
                },
                with_vectors: true,
            })
            .await
    }
}
