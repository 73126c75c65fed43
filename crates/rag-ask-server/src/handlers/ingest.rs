use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::ingest::{document_from_upload, AuditAction, DocOutcome};
use crate::models::{DocMeta, NormalizedDoc};
use crate::state::AppState;
use crate::utils::error::ApiError;

const INGEST_TOKEN_HEADER: &str = "x-ingest-token";

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers
        .get(INGEST_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    state.ingest_token.verify(provided)
}

/// POST /ingest/preview: normalized form, chunking, and PII findings, no
/// persistence.
pub async fn preview_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(doc): Json<NormalizedDoc>,
) -> Result<Json<crate::ingest::PreviewReceipt>, ApiError> {
    authorize(&state, &headers)?;
    let receipt = state.ingest.preview(&doc)?;
    Ok(Json(receipt))
}

/// Publish accepts one document or a batch; a batch reports per-document
/// outcomes without aborting on the first failure.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum PublishBody {
    One(Box<NormalizedDoc>),
    Many(Vec<NormalizedDoc>),
}

/// POST /ingest/publish
pub async fn publish_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PublishBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;

    match body {
        PublishBody::One(doc) => {
            let receipt = state.ingest.publish(&doc).await?;
            Ok(Json(json!(receipt)))
        }
        PublishBody::Many(docs) => {
            let outcomes = state.ingest.publish_batch(&docs).await;
            let total = outcomes.len();
            let failed = outcomes
                .iter()
                .filter(|o| matches!(o, DocOutcome::Failed { .. }))
                .count();
            info!(total, failed, "batch publish finished");
            Ok(Json(json!({
                "results": outcomes,
                "total": total,
                "failed": failed,
            })))
        }
    }
}

#[derive(Deserialize)]
pub struct AuditParams {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

/// GET /ingest/audit: most recent ingest events, newest first.
pub async fn audit_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::extract::Query(params): axum::extract::Query<AuditParams>,
) -> Result<Json<Vec<crate::ingest::AuditEvent>>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(state.ingest.audit().recent(params.limit.min(1024))))
}

/// POST /ingest/upload: multipart with a `meta` JSON part and a `file`
/// part. Only text-like payloads are accepted here; format conversion is an
/// upstream concern.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<crate::ingest::PublishReceipt>, ApiError> {
    authorize(&state, &headers)?;

    let mut meta: Option<DocMeta> = None;
    let mut file: Option<(Bytes, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::SchemaInvalid(format!("multipart: {}", e)))?
    {
        match field.name() {
            Some("meta") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::SchemaInvalid(format!("meta part: {}", e)))?;
                meta = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| ApiError::SchemaInvalid(format!("meta: {}", e)))?,
                );
            }
            Some("file") => {
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::PayloadTooLarge(format!("file part: {}", e)))?;
                file = Some((bytes, mime));
            }
            _ => {}
        }
    }

    let meta = meta.ok_or_else(|| ApiError::SchemaInvalid("missing meta part".to_string()))?;
    let (bytes, mime) =
        file.ok_or_else(|| ApiError::SchemaInvalid("missing file part".to_string()))?;

    state.ingest.audit().record(
        &meta.tenant,
        &meta.doc_id,
        AuditAction::UploadReceived,
        0,
        Some(mime.clone()),
    );

    let doc = document_from_upload(meta, &bytes, &mime)?;
    let receipt = state.ingest.publish(&doc).await?;
    Ok(Json(receipt))
}
