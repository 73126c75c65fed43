use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ScoredPoint, ScrollPage, ScrollRequest, StoreError, StorePoint, VectorQuery, VectorStore,
};
use crate::utils::similarity::cosine_similarity;

/// In-memory [`VectorStore`] with the same filter semantics as the Qdrant
/// implementation. Backs tests and local development without a running
/// collection.
#[derive(Default)]
pub struct MemoryVectorStore {
    points: RwLock<Vec<StorePoint>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    fn passes_filter(point: &StorePoint, tenant: &str, principals: &[String]) -> bool {
        point.payload.tenant == tenant
            && point
                .payload
                .acl
                .iter()
                .any(|entry| principals.iter().any(|p| p == entry))
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert(&self, new_points: Vec<StorePoint>) -> Result<(), StoreError> {
        let mut points = self.points.write().await;
        for incoming in new_points {
            if let Some(existing) = points.iter_mut().find(|p| p.id == incoming.id) {
                *existing = incoming;
            } else {
                points.push(incoming);
            }
        }
        Ok(())
    }

    async fn search(&self, query: VectorQuery) -> Result<Vec<ScoredPoint>, StoreError> {
        let points = self.points.read().await;
        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .filter(|p| Self::passes_filter(p, &query.filter.tenant, &query.filter.principals))
            .map(|p| ScoredPoint {
                id: p.id,
                score: cosine_similarity(&query.vector, &p.vector).unwrap_or(0.0),
                payload: p.payload.clone(),
                vector: query.with_vectors.then(|| p.vector.clone()),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.limit);
        Ok(scored)
    }

    async fn scroll(&self, request: ScrollRequest) -> Result<ScrollPage, StoreError> {
        let points = self.points.read().await;

        let mut matching: Vec<&StorePoint> = points
            .iter()
            .filter(|p| Self::passes_filter(p, &request.filter.tenant, &request.filter.principals))
            .filter(|p| match &request.text_match {
                Some(text) => {
                    let content = p.payload.content.to_lowercase();
                    text.to_lowercase()
                        .split_whitespace()
                        .any(|term| content.contains(term))
                }
                None => true,
            })
            .collect();
        matching.sort_by_key(|p| p.id);

        let start = match request.offset {
            Some(offset) => matching
                .iter()
                .position(|p| p.id == offset)
                .unwrap_or(matching.len()),
            None => 0,
        };

        let page: Vec<ScoredPoint> = matching
            .iter()
            .skip(start)
            .take(request.limit)
            .map(|p| ScoredPoint {
                id: p.id,
                score: 0.0,
                payload: p.payload.clone(),
                vector: request.with_vectors.then(|| p.vector.clone()),
            })
            .collect();

        let next_offset = if start + request.limit < matching.len() {
            matching.get(start + request.limit).map(|p| p.id)
        } else {
            None
        };

        Ok(ScrollPage {
            points: page,
            next_offset,
        })
    }

    async fn delete_by_doc(&self, tenant: &str, doc_id: &str) -> Result<u64, StoreError> {
        let mut points = self.points.write().await;
        let before = points.len();
        points.retain(|p| !(p.payload.tenant == tenant && p.payload.doc_id == doc_id));
        Ok((before - points.len()) as u64)
    }
}
