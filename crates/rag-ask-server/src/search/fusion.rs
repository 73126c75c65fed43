use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vectorstore::{ChunkPayload, ScoredPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Hybrid,
    VectorOnly,
    KeywordOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrfConfig {
    /// Rank smoothing constant; 60 per the original RRF paper.
    pub k: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            vector_weight: 1.0,
            keyword_weight: 1.0,
        }
    }
}

/// One retrieval result flowing through fusion, rerank, guardrail, and
/// packing. Owned by the request; nothing here is shared across requests.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    /// Deterministic chunk id (`payload.chunk_id`).
    pub id: String,
    pub point_id: Uuid,
    pub payload: ChunkPayload,
    pub vector: Option<Vec<f32>>,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
    pub fusion_score: f32,
    pub rerank_score: Option<f32>,
    /// 1-based position after fusion (and after rerank when it ran).
    pub rank: usize,
    pub search_type: SearchType,
}

impl RetrievedChunk {
    /// Relevance in [0, 1] for guardrail statistics: reranker wins, then the
    /// dense similarity, then the lexical score. Raw RRF sums are rank
    /// currency, not relevance, so they are never used here directly.
    pub fn relevance(&self) -> f32 {
        self.rerank_score
            .or(self.vector_score)
            .or(self.keyword_score)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}

/// Reciprocal rank fusion of the dense and lexical result lists:
/// `score(d) = Σ weight_s / (k + rank_s(d))`. Depends only on ranks, never
/// on the absolute scores either source reports.
pub fn fuse(
    vector_results: Vec<ScoredPoint>,
    keyword_results: Vec<(ScoredPoint, f32)>,
    config: &RrfConfig,
) -> Vec<RetrievedChunk> {
    struct Entry {
        point: ScoredPoint,
        vector_score: Option<f32>,
        keyword_score: Option<f32>,
        fusion_score: f32,
    }

    let mut entries: HashMap<String, Entry> = HashMap::new();

    for (index, point) in vector_results.into_iter().enumerate() {
        let rank = (index + 1) as f32;
        let contribution = config.vector_weight / (config.k + rank);
        let entry = entries
            .entry(point.payload.chunk_id.clone())
            .or_insert_with(|| Entry {
                vector_score: None,
                keyword_score: None,
                fusion_score: 0.0,
                point,
            });
        entry.vector_score = Some(entry.point.score);
        entry.fusion_score += contribution;
    }

    for (index, (point, lexical_score)) in keyword_results.into_iter().enumerate() {
        let rank = (index + 1) as f32;
        let contribution = config.keyword_weight / (config.k + rank);
        let entry = entries
            .entry(point.payload.chunk_id.clone())
            .or_insert_with(|| Entry {
                vector_score: None,
                keyword_score: None,
                fusion_score: 0.0,
                point,
            });
        entry.keyword_score = Some(lexical_score);
        entry.fusion_score += contribution;
    }

    let mut fused: Vec<Entry> = entries.into_values().collect();
    // Deterministic: score descending, chunk id as tie-break.
    fused.sort_by(|a, b| {
        b.fusion_score
            .partial_cmp(&a.fusion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.point.payload.chunk_id.cmp(&b.point.payload.chunk_id))
    });

    fused
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let search_type = match (entry.vector_score, entry.keyword_score) {
                (Some(_), Some(_)) => SearchType::Hybrid,
                (Some(_), None) => SearchType::VectorOnly,
                (None, _) => SearchType::KeywordOnly,
            };
            RetrievedChunk {
                id: entry.point.payload.chunk_id.clone(),
                point_id: entry.point.id,
                vector: entry.point.vector.clone(),
                payload: entry.point.payload,
                vector_score: entry.vector_score,
                keyword_score: entry.keyword_score,
                fusion_score: entry.fusion_score,
                rerank_score: None,
                rank: index + 1,
                search_type,
            }
        })
        .collect()
}
