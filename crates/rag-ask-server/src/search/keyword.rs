use std::sync::Arc;

use tracing::debug;

use crate::ingest::corpus_stats::CorpusStatsRegistry;
use crate::models::UserContext;
use crate::vectorstore::{payload, AccessFilter, ScoredPoint, ScrollRequest, StoreError, VectorStore};

/// How many text-matched points to pull before lexical ranking. The store
/// filter is boolean, so ranking happens here.
const SCAN_FACTOR: usize = 4;

/// Lexical search over the `content` payload index. The store narrows to
/// tenant+ACL+text matches; this adapter ranks them with idf-weighted term
/// overlap using the tenant's corpus statistics when available.
pub struct KeywordSearchAdapter {
    store: Arc<dyn VectorStore>,
    corpus_stats: Arc<CorpusStatsRegistry>,
}

impl KeywordSearchAdapter {
    pub fn new(store: Arc<dyn VectorStore>, corpus_stats: Arc<CorpusStatsRegistry>) -> Self {
        Self {
            store,
            corpus_stats,
        }
    }

    pub async fn search(
        &self,
        query_text: &str,
        ctx: &UserContext,
        limit: usize,
    ) -> Result<Vec<(ScoredPoint, f32)>, StoreError> {
        let query_tokens = payload::core_tokens(query_text);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let page = self
            .store
            .scroll(ScrollRequest {
                filter: AccessFilter {
                    tenant: ctx.tenant_id.clone(),
                    principals: ctx.principals(),
                },
                text_match: Some(query_text.to_string()),
                limit: limit * SCAN_FACTOR,
                offset: None,
                with_vectors: false,
            })
            .await?;

        let stats = self.corpus_stats.get(&ctx.tenant_id).await;

        let mut scored: Vec<(ScoredPoint, f32)> = page
            .points
            .into_iter()
            .map(|point| {
                let score = lexical_score(
                    &query_tokens,
                    &point.payload.lexical_core_tokens,
                    &point.payload.content,
                    stats.as_deref().map(|s| {
                        query_tokens
                            .iter()
                            .map(|t| s.idf_for(t))
                            .collect::<Vec<f64>>()
                    }),
                );
                (point, score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.payload.chunk_id.cmp(&b.0.payload.chunk_id))
        });
        scored.truncate(limit);

        debug!(
            query_tokens = query_tokens.len(),
            results = scored.len(),
            "keyword search"
        );
        Ok(scored)
    }
}

/// Normalized idf-weighted overlap in [0, 1]: matched weight over total
/// query weight. Without corpus stats every term weighs 1.
fn lexical_score(
    query_tokens: &[String],
    core_tokens: &[String],
    content: &str,
    idf_weights: Option<Vec<f64>>,
) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }

    let content_lower = content.to_lowercase();
    let weights = idf_weights.unwrap_or_else(|| vec![1.0; query_tokens.len()]);

    let mut matched = 0.0f64;
    let mut total = 0.0f64;
    for (token, weight) in query_tokens.iter().zip(weights.iter()) {
        total += weight;
        if core_tokens.contains(token) || content_lower.contains(token.as_str()) {
            matched += weight;
        }
    }

    if total <= 0.0 {
        0.0
    } else {
        (matched / total) as f32
    }
}
