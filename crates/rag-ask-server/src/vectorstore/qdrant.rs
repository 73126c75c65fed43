use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder,
    CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance, FieldType, Filter,
    HnswConfigDiffBuilder, PointId, PointStruct, ScalarQuantizationBuilder,
    ScrollPointsBuilder, SearchParamsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AccessFilter, ChunkPayload, ScoredPoint, ScrollPage, ScrollRequest, StoreError, StorePoint,
    VectorQuery, VectorStore,
};

const HNSW_M: u64 = 32;
const HNSW_EF_CONSTRUCT: u64 = 200;
const QUANTIZATION_QUANTILE: f32 = 0.99;

/// Payload fields indexed at collection bootstrap.
const KEYWORD_INDEXES: &[&str] = &[
    "tenant",
    "docId",
    "acl",
    "lang",
    "url",
    "version",
    "spaceId",
    "lexicalCoreTokens",
    "lexicalPhrases",
    "lexicalLanguage",
];
const DATETIME_INDEXES: &[&str] = &["createdAt", "modifiedAt"];

fn default_concurrency() -> usize {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct QdrantStoreConfig {
    pub url: String,
    pub collection: String,
    pub vector_dim: usize,
    /// Cap on in-flight store calls over the pooled connection.
    #[serde(default = "default_concurrency")]
    pub concurrency_limit: usize,
}

/// Qdrant-backed [`VectorStore`]. One collection holds every tenant's
/// chunks; tenancy isolation relies on the mandatory filter each read
/// carries plus the tenant payload index. A semaphore bounds in-flight
/// calls against the pooled connection.
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    vector_dim: usize,
    permits: Arc<Semaphore>,
}

impl QdrantStore {
    pub fn connect(config: &QdrantStoreConfig) -> Result<Self, StoreError> {
        let client = Qdrant::from_url(&config.url)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            collection: config.collection.clone(),
            vector_dim: config.vector_dim,
            permits: Arc::new(Semaphore::new(config.concurrency_limit.max(1))),
        })
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, StoreError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("store permits closed".to_string()))
    }

    fn access_conditions(filter: &AccessFilter) -> Vec<Condition> {
        vec![
            Condition::matches("tenant", filter.tenant.clone()),
            Condition::matches("acl", filter.principals.clone()),
        ]
    }

    fn doc_filter(tenant: &str, doc_id: &str) -> Filter {
        Filter::must([
            Condition::matches("tenant", tenant.to_string()),
            Condition::matches("docId", doc_id.to_string()),
        ])
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self) -> Result<(), StoreError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(
                            self.vector_dim as u64,
                            Distance::Cosine,
                        ))
                        .hnsw_config(
                            HnswConfigDiffBuilder::default()
                                .m(HNSW_M)
                                .ef_construct(HNSW_EF_CONSTRUCT),
                        )
                        .quantization_config(
                            ScalarQuantizationBuilder::default()
                                .quantile(QUANTIZATION_QUANTILE)
                                .always_ram(true),
                        ),
                )
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            info!(collection = %self.collection, dim = self.vector_dim, "created collection");
        }

        for field in KEYWORD_INDEXES {
            self.create_index(field, FieldType::Keyword).await?;
        }
        self.create_index("content", FieldType::Text).await?;
        for field in DATETIME_INDEXES {
            self.create_index(field, FieldType::Datetime).await?;
        }

        Ok(())
    }

    async fn upsert(&self, points: Vec<StorePoint>) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let _permit = self.acquire().await?;

        let mut structs = Vec::with_capacity(points.len());
        for point in points {
            let json = serde_json::to_value(&point.payload)
                .map_err(|e| StoreError::InvalidPayload(e.to_string()))?;
            let payload = Payload::try_from(json)
                .map_err(|e| StoreError::InvalidPayload(e.to_string()))?;
            structs.push(PointStruct::new(
                point.id.to_string(),
                point.vector,
                payload,
            ));
        }

        let count = structs.len();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, structs).wait(true))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!(points = count, collection = %self.collection, "upserted points");
        Ok(())
    }

    async fn search(&self, query: VectorQuery) -> Result<Vec<ScoredPoint>, StoreError> {
        let _permit = self.acquire().await?;
        let filter = Filter::must(Self::access_conditions(&query.filter));

        let mut builder =
            SearchPointsBuilder::new(&self.collection, query.vector, query.limit as u64)
                .filter(filter)
                .with_payload(true)
                .with_vectors(query.with_vectors);
        if let Some(ef) = query.ef {
            builder = builder.params(SearchParamsBuilder::default().hnsw_ef(ef));
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut out = Vec::with_capacity(response.result.len());
        for point in response.result {
            match decode_point(point.id, point.payload, point.vectors, point.score) {
                Ok(scored) => out.push(scored),
                Err(e) => warn!(error = %e, "skipping undecodable point"),
            }
        }
        Ok(out)
    }

    async fn scroll(&self, request: ScrollRequest) -> Result<ScrollPage, StoreError> {
        let _permit = self.acquire().await?;
        let mut conditions = Self::access_conditions(&request.filter);
        if let Some(text) = &request.text_match {
            conditions.push(Condition::matches_text("content", text.clone()));
        }

        let mut builder = ScrollPointsBuilder::new(&self.collection)
            .filter(Filter::must(conditions))
            .limit(request.limit as u32)
            .with_payload(true)
            .with_vectors(request.with_vectors);
        if let Some(offset) = request.offset {
            builder = builder.offset(PointId::from(offset.to_string()));
        }

        let response = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let next_offset = response
            .next_page_offset
            .as_ref()
            .and_then(point_id_to_uuid);

        let mut points = Vec::with_capacity(response.result.len());
        for point in response.result {
            match decode_point(point.id, point.payload, point.vectors, 0.0) {
                Ok(scored) => points.push(scored),
                Err(e) => warn!(error = %e, "skipping undecodable point"),
            }
        }

        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    async fn delete_by_doc(&self, tenant: &str, doc_id: &str) -> Result<u64, StoreError> {
        let _permit = self.acquire().await?;
        let filter = Self::doc_filter(tenant, doc_id);

        let existing = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(filter.clone())
                    .exact(true),
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .result
            .map(|r| r.count)
            .unwrap_or(0);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(filter)
                    .wait(true),
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!(tenant, doc_id, removed = existing, "deleted document points");
        Ok(existing)
    }
}

impl QdrantStore {
    async fn create_index(&self, field: &str, field_type: FieldType) -> Result<(), StoreError> {
        // Index creation is idempotent on the server side; errors other than
        // "already exists" surface as Unavailable.
        match self
            .client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection,
                field,
                field_type,
            ))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("already exists") {
                    Ok(())
                } else {
                    Err(StoreError::Unavailable(msg))
                }
            }
        }
    }
}

fn point_id_to_uuid(id: &PointId) -> Option<Uuid> {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match id.point_id_options.as_ref()? {
        PointIdOptions::Uuid(s) => Uuid::parse_str(s).ok(),
        PointIdOptions::Num(_) => None,
    }
}

fn decode_point(
    id: Option<PointId>,
    payload: std::collections::HashMap<String, qdrant_client::qdrant::Value>,
    vectors: Option<qdrant_client::qdrant::VectorsOutput>,
    score: f32,
) -> Result<ScoredPoint, StoreError> {
    let id = id
        .as_ref()
        .and_then(point_id_to_uuid)
        .ok_or_else(|| StoreError::InvalidPayload("point without uuid id".to_string()))?;

    let mut map = serde_json::Map::with_capacity(payload.len());
    for (key, value) in payload {
        map.insert(key, value.into_json());
    }
    let payload: ChunkPayload = serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| StoreError::InvalidPayload(e.to_string()))?;

    let vector = vectors.and_then(|v| {
        use qdrant_client::qdrant::vectors_output::VectorsOptions;
        match v.vectors_options? {
            VectorsOptions::Vector(v) => Some(v.data),
            VectorsOptions::Vectors(_) => None,
        }
    });

    Ok(ScoredPoint {
        id,
        score,
        payload,
        vector,
    })
}
