pub mod memory;
pub mod payload;
pub mod qdrant;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryVectorStore;
pub use payload::ChunkPayload;
pub use qdrant::{QdrantStore, QdrantStoreConfig};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("vector store timeout: {0}")]
    Timeout(String),
}

/// A point to persist: id, unit vector, payload.
#[derive(Debug, Clone)]
pub struct StorePoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// Server-side tenancy and permission scope. Every read goes through one of
/// these; there is no unfiltered read path.
#[derive(Debug, Clone)]
pub struct AccessFilter {
    pub tenant: String,
    /// `{user id} ∪ group ids`; matches any element of the point's `acl`.
    pub principals: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    /// HNSW search width override for this query.
    pub ef: Option<u64>,
    pub filter: AccessFilter,
    pub with_vectors: bool,
}

#[derive(Debug, Clone)]
pub struct ScrollRequest {
    pub filter: AccessFilter,
    /// Full-text match against the `content` payload index.
    pub text_match: Option<String>,
    pub limit: usize,
    pub offset: Option<Uuid>,
    pub with_vectors: bool,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: ChunkPayload,
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<ScoredPoint>,
    pub next_offset: Option<Uuid>,
}

/// Contract over the persisted chunk+embedding state. The store exclusively
/// owns that state: ingest creates and replaces, tombstones remove.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection and payload indexes if missing.
    async fn ensure_collection(&self) -> Result<(), StoreError>;

    async fn upsert(&self, points: Vec<StorePoint>) -> Result<(), StoreError>;

    async fn search(&self, query: VectorQuery) -> Result<Vec<ScoredPoint>, StoreError>;

    async fn scroll(&self, request: ScrollRequest) -> Result<ScrollPage, StoreError>;

    /// Remove every point of `(tenant, doc_id)`; returns how many existed.
    async fn delete_by_doc(&self, tenant: &str, doc_id: &str) -> Result<u64, StoreError>;
}
