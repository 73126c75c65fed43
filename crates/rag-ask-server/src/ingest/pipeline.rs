use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::embedding::{ChunkEmbedding, Embedder, EmbeddingError};
use crate::models::{BlockType, Chunk, NormalizedDoc};
use crate::text::chunker::{AdaptiveChunker, ChunkScope};
use crate::text::guard::IngestionGuard;
use crate::text::table_chunker::TableChunker;
use crate::utils::error::ApiError;
use crate::vectorstore::{ChunkPayload, StorePoint, VectorStore};

use super::audit::{AuditAction, AuditLog};
use super::corpus_stats::CorpusStatsRegistry;
use super::pii::{self, PiiFinding};
use super::sections::SectionTracker;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Mime types `upload` accepts; everything else is converted upstream.
const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "text/markdown",
    "text/x-markdown",
    "application/xml",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub tenant: String,
    pub doc_id: String,
    pub tombstoned: bool,
    pub chunks_written: usize,
    pub chunks_rejected: usize,
    pub points_removed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPreview {
    pub id: String,
    pub text: String,
    pub token_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    pub is_table: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReceipt {
    pub tenant: String,
    pub doc_id: String,
    pub chunks: Vec<ChunkPreview>,
    pub chunks_rejected: usize,
    pub pii_findings: Vec<PiiFinding>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum DocOutcome {
    Ok(PublishReceipt),
    Failed { tenant: String, doc_id: String, error: String },
}

/// Normalize → chunk → guard → embed → upsert, with tombstone cascade and
/// per-document serialization on `(tenant, doc_id)`.
pub struct IngestPipeline {
    chunker: Arc<AdaptiveChunker>,
    table_chunker: TableChunker,
    guard: IngestionGuard,
    embedding: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    corpus_stats: Arc<CorpusStatsRegistry>,
    audit: Arc<AuditLog>,
    doc_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IngestPipeline {
    pub fn new(
        chunker: Arc<AdaptiveChunker>,
        table_chunker: TableChunker,
        guard: IngestionGuard,
        embedding: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        corpus_stats: Arc<CorpusStatsRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            chunker,
            table_chunker,
            guard,
            embedding,
            store,
            corpus_stats,
            audit,
            doc_locks: DashMap::new(),
        }
    }

    /// Validate + chunk + PII scan without persisting anything.
    pub fn preview(&self, doc: &NormalizedDoc) -> Result<PreviewReceipt, ApiError> {
        doc.validate()
            .map_err(|fields| ApiError::SchemaInvalid(fields.join("; ")))?;

        let (chunks, warnings) = self.chunk_document(doc);
        let report = self.guard.apply(chunks);

        let mut pii_findings = Vec::new();
        for block in &doc.blocks {
            if let Some(text) = block_text(block) {
                pii_findings.extend(pii::scan(&text));
            }
        }

        self.audit.record(
            &doc.meta.tenant,
            &doc.meta.doc_id,
            AuditAction::PreviewServed,
            report.accepted.len(),
            None,
        );

        Ok(PreviewReceipt {
            tenant: doc.meta.tenant.clone(),
            doc_id: doc.meta.doc_id.clone(),
            chunks: report
                .accepted
                .iter()
                .map(|c| ChunkPreview {
                    id: c.id.clone(),
                    text: c.text.clone(),
                    token_count: c.token_count,
                    section_path: c.section_path.clone(),
                    is_table: c.metadata.is_table,
                })
                .collect(),
            chunks_rejected: report.rejected.len(),
            pii_findings,
            warnings,
        })
    }

    /// Publish one document. Tombstones cascade-delete; live documents are
    /// replaced wholesale (delete then upsert) so stale chunks never linger.
    pub async fn publish(&self, doc: &NormalizedDoc) -> Result<PublishReceipt, ApiError> {
        doc.validate()
            .map_err(|fields| ApiError::SchemaInvalid(fields.join("; ")))?;

        let tenant = doc.meta.tenant.clone();
        let doc_id = doc.meta.doc_id.clone();

        // Concurrent publishes of the same document must not interleave.
        let lock = self
            .doc_locks
            .entry(format!("{}|{}", tenant, doc_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _held = lock.lock().await;

        if doc.is_tombstone() {
            let removed = self
                .store
                .delete_by_doc(&tenant, &doc_id)
                .await
                .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

            self.audit.record(
                &tenant,
                &doc_id,
                AuditAction::Tombstoned,
                0,
                Some(format!("removed {} points", removed)),
            );

            return Ok(PublishReceipt {
                tenant,
                doc_id,
                tombstoned: true,
                chunks_written: 0,
                chunks_rejected: 0,
                points_removed: removed,
                warnings: Vec::new(),
            });
        }

        let (chunks, mut warnings) = self.chunk_document(doc);
        let report = self.guard.apply(chunks);
        for rejected in &report.rejected {
            debug!(chunk = %rejected.id, "chunk rejected by ingestion guard");
        }

        if report.accepted.is_empty() {
            warnings.push("no chunks survived the ingestion guard".to_string());
            self.audit.record(
                &tenant,
                &doc_id,
                AuditAction::Failed,
                0,
                Some("no accepted chunks".to_string()),
            );
            return Ok(PublishReceipt {
                tenant,
                doc_id,
                tombstoned: false,
                chunks_written: 0,
                chunks_rejected: report.rejected.len(),
                points_removed: 0,
                warnings,
            });
        }

        let embeddings = self.embed_resilient(&report.accepted).await?;

        let removed = self
            .store
            .delete_by_doc(&tenant, &doc_id)
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

        let points: Vec<StorePoint> = report
            .accepted
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| StorePoint {
                id: chunk.point_id(),
                vector: embedding.vector.clone(),
                payload: ChunkPayload::from_chunk(chunk, &doc.meta),
            })
            .collect();

        let written = points.len();
        self.store
            .upsert(points)
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

        // Feed corpus statistics for the lexical scorer.
        let core_tokens: Vec<String> = report
            .accepted
            .iter()
            .flat_map(|c| crate::vectorstore::payload::core_tokens(&c.text))
            .collect();
        let total_tokens: usize = report.accepted.iter().map(|c| c.token_count).sum();
        self.corpus_stats
            .observe_publish(&tenant, &core_tokens, total_tokens)
            .await;

        self.audit
            .record(&tenant, &doc_id, AuditAction::Published, written, None);
        info!(tenant, doc_id, written, rejected = report.rejected.len(), "document published");

        Ok(PublishReceipt {
            tenant,
            doc_id,
            tombstoned: false,
            chunks_written: written,
            chunks_rejected: report.rejected.len(),
            points_removed: removed,
            warnings,
        })
    }

    /// Publish many documents; one failure never aborts the batch.
    pub async fn publish_batch(&self, docs: &[NormalizedDoc]) -> Vec<DocOutcome> {
        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            match self.publish(doc).await {
                Ok(receipt) => outcomes.push(DocOutcome::Ok(receipt)),
                Err(e) => {
                    warn!(
                        tenant = %doc.meta.tenant,
                        doc_id = %doc.meta.doc_id,
                        error = %e,
                        "document publish failed"
                    );
                    self.audit.record(
                        &doc.meta.tenant,
                        &doc.meta.doc_id,
                        AuditAction::Failed,
                        0,
                        Some(e.to_string()),
                    );
                    outcomes.push(DocOutcome::Failed {
                        tenant: doc.meta.tenant.clone(),
                        doc_id: doc.meta.doc_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        outcomes
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Token-aware chunking per block. Text blocks advance the heading
    /// context; tables are row-atomic; code never section-splits (its `#`
    /// lines are not headings); image refs carry no text.
    fn chunk_document(&self, doc: &NormalizedDoc) -> (Vec<Chunk>, Vec<String>) {
        let mut tracker = SectionTracker::new();
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut warnings = Vec::new();
        // Document-global character cursor so start indexes (and chunk ids)
        // stay unique when one section spans several blocks.
        let mut cursor = 0usize;

        for (block_index, block) in doc.blocks.iter().enumerate() {
            let Some(text) = block_text(block) else {
                continue;
            };

            match block.block_type {
                BlockType::Text => {
                    for section in tracker.split(&text) {
                        let content = match &section.heading {
                            Some(heading) if section.body.is_empty() => heading.clone(),
                            Some(heading) => format!("{}\n{}", heading, section.body),
                            None => section.body.clone(),
                        };
                        let scope = ChunkScope {
                            tenant: doc.meta.tenant.clone(),
                            doc_id: doc.meta.doc_id.clone(),
                            section_path: section.path.clone(),
                            order_base: chunks.len(),
                            start_base: cursor,
                        };
                        cursor += content.len() + 1;
                        let mut outcome = self.chunker.chunk(&content, &scope);
                        warnings.extend(outcome.warnings);
                        if section.heading.is_some() {
                            if let Some(first) = outcome.chunks.first_mut() {
                                first.metadata.is_section_header = true;
                            }
                        }
                        chunks.extend(outcome.chunks);
                    }
                }
                BlockType::Code => {
                    let scope = ChunkScope {
                        tenant: doc.meta.tenant.clone(),
                        doc_id: doc.meta.doc_id.clone(),
                        section_path: tracker.current_path(),
                        order_base: chunks.len(),
                        start_base: cursor,
                    };
                    cursor += text.len() + 1;
                    let outcome = self.chunker.chunk(&text, &scope);
                    warnings.extend(outcome.warnings);
                    chunks.extend(outcome.chunks);
                }
                BlockType::Table => {
                    let section_path = match tracker.current_path() {
                        Some(path) => format!("{} > [table {}]", path, block_index),
                        None => format!("[table {}]", block_index),
                    };
                    let scope = ChunkScope {
                        tenant: doc.meta.tenant.clone(),
                        doc_id: doc.meta.doc_id.clone(),
                        section_path: Some(section_path),
                        order_base: chunks.len(),
                        start_base: cursor,
                    };
                    cursor += text.len() + 1;
                    let outcome = self.table_chunker.chunk(&text, &scope);
                    warnings.extend(outcome.warnings);
                    chunks.extend(outcome.chunks);
                }
                BlockType::ImageRef => {}
            }
        }

        (chunks, warnings)
    }

    /// Embedding with the 413 fallback: payload-too-large re-chunks into
    /// smaller requests instead of retrying the same body.
    async fn embed_resilient(&self, chunks: &[Chunk]) -> Result<Vec<ChunkEmbedding>, ApiError> {
        match self.embedding.embed_chunks(chunks).await {
            Ok(embeddings) => Ok(embeddings),
            Err(EmbeddingError::PayloadTooLarge) if chunks.len() > 1 => {
                warn!(
                    chunks = chunks.len(),
                    "embedding payload too large, splitting batch"
                );
                let mid = chunks.len() / 2;
                let (left, right) = chunks.split_at(mid);
                let mut embeddings = Box::pin(self.embed_resilient(left)).await?;
                embeddings.extend(Box::pin(self.embed_resilient(right)).await?);
                Ok(embeddings)
            }
            Err(EmbeddingError::PayloadTooLarge) => Err(ApiError::PayloadTooLarge(
                "single chunk exceeds embedding service payload limit".to_string(),
            )),
            Err(e) => Err(ApiError::UpstreamUnavailable(e.to_string())),
        }
    }
}

fn block_text(block: &crate::models::Block) -> Option<String> {
    if let Some(text) = block.text.as_deref() {
        if !text.trim().is_empty() {
            return Some(text.to_string());
        }
    }
    block
        .html
        .as_deref()
        .map(|html| TAG.replace_all(html, " ").to_string())
        .filter(|stripped| !stripped.trim().is_empty())
}

/// Wrap an uploaded text-like payload into a normalized document. Formats
/// that need real conversion are an upstream concern and get a 415 here.
pub fn document_from_upload(
    mut meta: crate::models::DocMeta,
    bytes: &[u8],
    mime: &str,
) -> Result<NormalizedDoc, ApiError> {
    let mime_base = mime.split(';').next().unwrap_or("").trim().to_lowercase();
    let accepted = mime_base.starts_with("text/") || TEXT_MIME_TYPES.contains(&mime_base.as_str());
    if !accepted {
        return Err(ApiError::UnsupportedMedia(mime_base));
    }

    let (text, had_errors) = decode_text(bytes);
    if had_errors {
        debug!(mime = %mime_base, "upload decoded with replacement characters");
    }
    if text.trim().is_empty() {
        return Err(ApiError::SchemaInvalid("uploaded file is empty".to_string()));
    }

    meta.sha256 = hex::encode(Sha256::digest(bytes));

    Ok(NormalizedDoc {
        meta,
        blocks: vec![crate::models::Block {
            block_type: BlockType::Text,
            text: Some(text),
            html: None,
        }],
    })
}

/// UTF-8 first; if the bytes do not decode cleanly, fall back to
/// Windows-1252, the usual culprit for "text" exports.
fn decode_text(bytes: &[u8]) -> (String, bool) {
    let (text, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if !had_errors {
        return (text.into_owned(), false);
    }
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    (text.into_owned(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingConfig, EmbeddingService};
    use crate::models::{Block, DocMeta};
    use crate::text::token_counter::{TokenCounter, TokenizerKind, TokenizerSpec};
    use crate::vectorstore::MemoryVectorStore;
    use chrono::Utc;

    fn counter() -> Arc<TokenCounter> {
        Arc::new(TokenCounter::new(TokenizerSpec {
            model: "test".into(),
            kind: TokenizerKind::Custom,
            max_tokens: 200,
            safety_margin: 0.0,
            char_to_token_ratio: Some(1.0),
        }))
    }

    fn pipeline(store: Arc<MemoryVectorStore>, dir: &std::path::Path) -> IngestPipeline {
        let counter = counter();
        let chunker = Arc::new(AdaptiveChunker::new(counter.clone(), None, 0));
        let embedding = Arc::new(EmbeddingService::new(
            EmbeddingConfig {
                base_url: "http://127.0.0.1:9".into(),
                model: "test-embed".into(),
                dimensions: 4,
                api_key: None,
                max_batch_size: 16,
                timeout_seconds: 1,
                retry: Default::default(),
            },
            chunker.clone(),
        ));
        IngestPipeline::new(
            chunker,
            TableChunker::new(counter.clone(), 200, true),
            IngestionGuard::default(),
            embedding,
            store,
            Arc::new(CorpusStatsRegistry::new(dir)),
            Arc::new(AuditLog::new()),
        )
    }

    fn doc(blocks: Vec<Block>) -> NormalizedDoc {
        NormalizedDoc {
            meta: DocMeta {
                tenant: "acme".into(),
                doc_id: "doc-1".into(),
                source: "wiki/page".into(),
                sha256: "a".repeat(64),
                acl: vec!["group:everyone".into()],
                timestamp: Utc::now(),
                modified_at: None,
                version: None,
                lang: Some("en".into()),
                title: Some("Page".into()),
                path: None,
                url: None,
                authors: None,
                tags: None,
                deleted: false,
            },
            blocks,
        }
    }

    fn text_block(text: &str) -> Block {
        Block {
            block_type: BlockType::Text,
            text: Some(text.into()),
            html: None,
        }
    }

    #[tokio::test]
    async fn chunking_assigns_section_paths_and_header_flags() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Arc::new(MemoryVectorStore::new()), dir.path());
        let (chunks, warnings) = p.chunk_document(&doc(vec![text_block(
            "# Guide\nIntro paragraph with enough words.\n## Refunds\nRefund paragraph with enough words.",
        )]));

        assert!(warnings.is_empty());
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].section_path.as_deref(), Some("Guide"));
        assert!(chunks[0].metadata.is_section_header);
        assert!(chunks
            .iter()
            .any(|c| c.section_path.as_deref() == Some("Guide > Refunds")));
        // Order indexes stay document-global
        let orders: Vec<usize> = chunks.iter().map(|c| c.metadata.order_index).collect();
        let expected: Vec<usize> = (0..chunks.len()).collect();
        assert_eq!(orders, expected);
    }

    #[tokio::test]
    async fn table_blocks_inherit_heading_context() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Arc::new(MemoryVectorStore::new()), dir.path());
        let (chunks, _) = p.chunk_document(&doc(vec![
            text_block("# Prices\nThe table below lists prices."),
            Block {
                block_type: BlockType::Table,
                text: Some("| item | price |\n|------|-------|\n| bolt | 2 |".into()),
                html: None,
            },
        ]));

        let table_chunk = chunks.iter().find(|c| c.metadata.is_table).unwrap();
        assert_eq!(
            table_chunk.section_path.as_deref(),
            Some("Prices > [table 1]")
        );
    }

    #[tokio::test]
    async fn code_block_hashes_are_not_headings() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Arc::new(MemoryVectorStore::new()), dir.path());
        let (chunks, _) = p.chunk_document(&doc(vec![Block {
            block_type: BlockType::Code,
            text: Some("# not a heading, just a comment line in code".into()),
            html: None,
        }]));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].section_path.is_none());
    }

    #[tokio::test]
    async fn html_blocks_are_tag_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Arc::new(MemoryVectorStore::new()), dir.path());
        let (chunks, _) = p.chunk_document(&doc(vec![Block {
            block_type: BlockType::Text,
            text: None,
            html: Some("<p>Paragraph with <b>enough</b> words to keep.</p>".into()),
        }]));
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].text.contains('<'));
        assert!(chunks[0].text.contains("enough"));
    }

    #[tokio::test]
    async fn tombstone_removes_existing_points() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryVectorStore::new());
        let p = pipeline(store.clone(), dir.path());

        // Seed a point for the doc directly; embedding service is offline
        let chunk = Chunk {
            id: Chunk::derive_id("acme", "doc-1", None, 0),
            text: "seeded chunk content for tombstone test".into(),
            token_count: 6,
            character_count: 39,
            start_index: 0,
            end_index: 39,
            section_path: None,
            metadata: crate::models::ChunkMetadata {
                tenant: "acme".into(),
                doc_id: "doc-1".into(),
                order_index: 0,
                is_table: false,
                is_section_header: false,
            },
        };
        let mut tombstone_doc = doc(vec![]);
        store
            .upsert(vec![StorePoint {
                id: chunk.point_id(),
                vector: vec![1.0, 0.0, 0.0, 0.0],
                payload: ChunkPayload::from_chunk(&chunk, &tombstone_doc.meta),
            }])
            .await
            .unwrap();

        tombstone_doc.meta.deleted = true;
        let receipt = p.publish(&tombstone_doc).await.unwrap();
        assert!(receipt.tombstoned);
        assert_eq!(receipt.points_removed, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn invalid_schema_reports_field_paths() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(Arc::new(MemoryVectorStore::new()), dir.path());
        let mut bad = doc(vec![text_block("content long enough to chunk")]);
        bad.meta.tenant = "".into();
        let err = p.publish(&bad).await.unwrap_err();
        match err {
            ApiError::SchemaInvalid(msg) => assert!(msg.contains("meta.tenant")),
            other => panic!("expected SchemaInvalid, got {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn preview_reports_pii_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryVectorStore::new());
        let p = pipeline(store.clone(), dir.path());
        let receipt = p
            .preview(&doc(vec![text_block(
                "Contact alice@example.com about the refund policy window.",
            )]))
            .unwrap();

        assert!(!receipt.chunks.is_empty());
        assert!(receipt
            .pii_findings
            .iter()
            .any(|f| matches!(f.kind, crate::ingest::pii::PiiKind::Email)));
        assert!(store.is_empty().await);
    }

    #[test]
    fn upload_rejects_binary_mime() {
        let meta = doc(vec![]).meta;
        let err = document_from_upload(meta, b"%PDF-1.4", "application/pdf").unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedMedia(_)));
    }

    #[test]
    fn upload_wraps_text_and_fingerprints_bytes() {
        let meta = doc(vec![]).meta;
        let wrapped =
            document_from_upload(meta, b"Plain text body for upload.", "text/plain; charset=utf-8")
                .unwrap();
        assert_eq!(wrapped.blocks.len(), 1);
        assert_eq!(
            wrapped.meta.sha256,
            hex::encode(Sha256::digest(b"Plain text body for upload."))
        );
        assert!(wrapped.validate().is_ok());
    }

    #[test]
    fn latin1_bytes_fall_back_cleanly() {
        let bytes = [b'c', b'a', b'f', 0xE9]; // "café" in Windows-1252
        let (text, had_errors) = decode_text(&bytes);
        assert!(had_errors);
        assert_eq!(text, "café");
    }
}
