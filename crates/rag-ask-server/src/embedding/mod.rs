pub mod service;

use async_trait::async_trait;

use crate::models::Chunk;

pub use service::{ChunkEmbedding, EmbeddingConfig, EmbeddingError, EmbeddingService, RetryConfig};

/// Seam between the pipelines and the embedding backend. The HTTP-backed
/// [`EmbeddingService`] is the production implementation; tests plug in a
/// deterministic one.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<ChunkEmbedding>, EmbeddingError>;
}
