//! End-to-end pipeline coverage over the in-memory store: publish documents,
//! retrieve with tenant/ACL scoping, gate through the guardrail, pack, and
//! build citations. The embedding backend is a deterministic hash embedder
//! so nothing here needs a network.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use rag_ask_server::embedding::{ChunkEmbedding, Embedder, EmbeddingError};
use rag_ask_server::guardrail::{GuardrailConfigMap, GuardrailEngine, TenantGuardrailConfig};
use rag_ask_server::ingest::{AuditLog, CorpusStatsRegistry, IngestPipeline};
use rag_ask_server::models::{
    Block, BlockType, Chunk, DocMeta, NormalizedDoc, ReasonCode, UserContext,
};
use rag_ask_server::packing::{ContextPacker, PackingConfig};
use rag_ask_server::search::{
    KeywordSearchAdapter, NoopReranker, RetrievalConfig, RetrievalService, VectorSearchAdapter,
    VectorSearchConfig,
};
use rag_ask_server::synthesis::citations::build_citation_map;
use rag_ask_server::text::chunker::AdaptiveChunker;
use rag_ask_server::text::guard::IngestionGuard;
use rag_ask_server::text::table_chunker::TableChunker;
use rag_ask_server::text::token_counter::{TokenCounter, TokenizerKind, TokenizerSpec};
use rag_ask_server::vectorstore::MemoryVectorStore;

const DIM: usize = 16;

/// Token-bucket hash embedding: texts sharing words land near each other,
/// and every vector is unit length.
struct HashEmbedder;

fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIM];
    for token in text.to_lowercase().split_whitespace() {
        let mut h: u32 = 0x811c9dc5;
        for b in token.as_bytes() {
            h ^= u32::from(*b);
            h = h.wrapping_mul(0x01000193);
        }
        vector[(h as usize) % DIM] += 1.0;
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(hash_vector(text))
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<ChunkEmbedding>, EmbeddingError> {
        Ok(chunks
            .iter()
            .map(|c| ChunkEmbedding {
                chunk_id: c.id.clone(),
                vector: hash_vector(&c.text),
                token_count: c.token_count,
                start_index: c.start_index,
                end_index: c.end_index,
                section_path: c.section_path.clone(),
            })
            .collect())
    }
}

fn counter() -> Arc<TokenCounter> {
    Arc::new(TokenCounter::new(TokenizerSpec {
        model: "test".into(),
        kind: TokenizerKind::Custom,
        max_tokens: 400,
        safety_margin: 0.0,
        char_to_token_ratio: Some(1.0),
    }))
}

struct Harness {
    store: Arc<MemoryVectorStore>,
    pipeline: IngestPipeline,
    retrieval: RetrievalService,
    guardrail: GuardrailEngine,
    packer: ContextPacker,
    _stats_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryVectorStore::new());
    let counter = counter();
    let chunker = Arc::new(AdaptiveChunker::new(counter.clone(), None, 0));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder);
    let stats_dir = tempfile::tempdir().unwrap();
    let corpus_stats = Arc::new(CorpusStatsRegistry::new(stats_dir.path()));

    let pipeline = IngestPipeline::new(
        chunker,
        TableChunker::new(counter, 400, true),
        IngestionGuard::default(),
        embedder.clone(),
        store.clone(),
        corpus_stats.clone(),
        Arc::new(AuditLog::new()),
    );

    let retrieval = RetrievalService::new(
        embedder,
        VectorSearchAdapter::new(store.clone(), VectorSearchConfig::default()),
        KeywordSearchAdapter::new(store.clone(), corpus_stats),
        Arc::new(NoopReranker),
        RetrievalConfig::default(),
    );

    // Loose thresholds: hash-embedding cosine scores are honest but modest.
    let mut guardrail_configs = HashMap::new();
    guardrail_configs.insert(
        "default".to_string(),
        TenantGuardrailConfig {
            enabled: true,
            min_confidence: 0.3,
            min_top_score: 0.2,
            min_mean_score: 0.1,
            min_result_count: 1,
        },
    );
    let guardrail = GuardrailEngine::new(Arc::new(GuardrailConfigMap::new(guardrail_configs)));

    let packer = ContextPacker::new(PackingConfig::default());

    Harness {
        store,
        pipeline,
        retrieval,
        guardrail,
        packer,
        _stats_dir: stats_dir,
    }
}

fn doc(tenant: &str, doc_id: &str, acl: &[&str], source: &str, body: &str) -> NormalizedDoc {
    NormalizedDoc {
        meta: DocMeta {
            tenant: tenant.into(),
            doc_id: doc_id.into(),
            source: source.into(),
            sha256: "b".repeat(64),
            acl: acl.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
            modified_at: None,
            version: None,
            lang: Some("en".into()),
            title: Some(source.into()),
            path: None,
            url: None,
            authors: None,
            tags: None,
            deleted: false,
        },
        blocks: vec![Block {
            block_type: BlockType::Text,
            text: Some(body.into()),
            html: None,
        }],
    }
}

fn user(tenant: &str, groups: &[&str]) -> UserContext {
    UserContext {
        id: "user-1".into(),
        tenant_id: tenant.into(),
        group_ids: groups.iter().map(|s| s.to_string()).collect(),
        language: None,
    }
}

#[tokio::test]
async fn publish_then_retrieve_round_trip() {
    let h = harness();

    h.pipeline
        .publish(&doc(
            "acme",
            "refunds",
            &["group:support"],
            "refunds.md",
            "# Refund policy\nRefunds are processed within fourteen business days of the request. \
             The refund window closes ninety days after purchase.",
        ))
        .await
        .unwrap();

    let outcome = h
        .retrieval
        .retrieve(
            "refund window days",
            &user("acme", &["group:support"]),
            None,
        )
        .await
        .unwrap();

    assert!(!outcome.results.is_empty());
    for result in &outcome.results {
        assert_eq!(result.payload.tenant, "acme");
        assert!(result.payload.acl.contains(&"group:support".to_string()));
        assert!(result.rank >= 1);
    }
}

#[tokio::test]
async fn retrieval_is_tenant_and_acl_scoped() {
    let h = harness();

    h.pipeline
        .publish(&doc(
            "acme",
            "internal",
            &["group:hr"],
            "salaries.md",
            "Salary bands for the engineering organization are reviewed every year.",
        ))
        .await
        .unwrap();

    // Wrong group: nothing comes back
    let denied = h
        .retrieval
        .retrieve("salary bands", &user("acme", &["group:support"]), None)
        .await
        .unwrap();
    assert!(denied.results.is_empty());

    // Wrong tenant: nothing comes back
    let cross_tenant = h
        .retrieval
        .retrieve("salary bands", &user("rival", &["group:hr"]), None)
        .await
        .unwrap();
    assert!(cross_tenant.results.is_empty());

    // Right tenant and group
    let allowed = h
        .retrieval
        .retrieve("salary bands review", &user("acme", &["group:hr"]), None)
        .await
        .unwrap();
    assert!(!allowed.results.is_empty());
}

#[tokio::test]
async fn guardrail_refuses_empty_retrieval_with_no_relevant_docs() {
    let h = harness();
    let ctx = user("acme", &["group:support"]);

    let outcome = h.retrieval.retrieve("anything", &ctx, None).await.unwrap();
    assert!(outcome.results.is_empty());

    let decision = h.guardrail.evaluate("anything", &outcome.results, &ctx);
    assert!(!decision.is_answerable);
    assert_eq!(decision.confidence, 0.0);
    assert_eq!(decision.reason_code, Some(ReasonCode::NoRelevantDocs));
    assert!(decision.suggestions.unwrap().len() >= 1);
}

#[tokio::test]
async fn packed_context_respects_budget_and_caps() {
    let h = harness();

    for i in 0..6 {
        h.pipeline
            .publish(&doc(
                "acme",
                &format!("doc-{}", i),
                &["group:support"],
                &format!("doc-{}.md", i),
                &format!(
                    "# Topic {i}\nRefund processing details part {i}. Refunds are handled in \
                     order of arrival and refund confirmation follows by mail."
                ),
            ))
            .await
            .unwrap();
    }

    let ctx = user("acme", &["group:support"]);
    let outcome = h
        .retrieval
        .retrieve("refund processing order", &ctx, None)
        .await
        .unwrap();
    assert!(!outcome.results.is_empty());

    let packed = h.packer.pack("refund processing order", &outcome.results);
    assert!(packed.total_tokens <= 8_000);

    let mut per_doc: HashMap<&str, usize> = HashMap::new();
    let mut per_section: HashMap<String, usize> = HashMap::new();
    for chunk in &packed.chunks {
        *per_doc.entry(chunk.payload.doc_id.as_str()).or_default() += 1;
        let section = format!(
            "{}#{}",
            chunk.payload.doc_id,
            chunk.payload.section_path.as_deref().unwrap_or("")
        );
        *per_section.entry(section).or_default() += 1;
    }
    assert!(per_doc.values().all(|count| *count <= 2));
    assert!(per_section.values().all(|count| *count <= 2));
}

#[tokio::test]
async fn citations_number_packed_documents_in_order() {
    let h = harness();

    h.pipeline
        .publish(&doc(
            "acme",
            "a",
            &["group:support"],
            "alpha.md",
            "Refund policy alpha explains the first refund pathway in detail.",
        ))
        .await
        .unwrap();
    h.pipeline
        .publish(&doc(
            "acme",
            "b",
            &["group:support"],
            "beta.md",
            "Refund policy beta explains the second refund pathway in detail.",
        ))
        .await
        .unwrap();

    let ctx = user("acme", &["group:support"]);
    let outcome = h
        .retrieval
        .retrieve("refund pathway", &ctx, None)
        .await
        .unwrap();
    let packed = h.packer.pack("refund pathway", &outcome.results);
    let citations = build_citation_map(&packed.chunks);

    assert!(!citations.is_empty());
    let numbers: Vec<u32> = citations.keys().copied().collect();
    let expected: Vec<u32> = (1..=citations.len() as u32).collect();
    assert_eq!(numbers, expected);
    for citation in citations.values() {
        assert!(!citation.qdrant_doc_id.is_empty());
        assert!(citation.freshness.is_some());
    }
}

#[tokio::test]
async fn tombstone_then_retrieve_finds_nothing() {
    let h = harness();
    let live = doc(
        "acme",
        "doomed",
        &["group:support"],
        "doomed.md",
        "Refund escalation cases go to the senior support queue for review.",
    );

    h.pipeline.publish(&live).await.unwrap();
    assert!(h.store.len().await > 0);

    let mut tombstone = live.clone();
    tombstone.meta.deleted = true;
    tombstone.blocks.clear();
    let receipt = h.pipeline.publish(&tombstone).await.unwrap();
    assert!(receipt.tombstoned);
    assert!(receipt.points_removed > 0);

    let outcome = h
        .retrieval
        .retrieve(
            "refund escalation queue",
            &user("acme", &["group:support"]),
            None,
        )
        .await
        .unwrap();
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn republish_replaces_chunks_instead_of_accumulating() {
    let h = harness();

    let first = doc(
        "acme",
        "doc-1",
        &["group:support"],
        "doc.md",
        "Original refund policy content, processed within fourteen days.",
    );
    h.pipeline.publish(&first).await.unwrap();
    let after_first = h.store.len().await;

    let second = doc(
        "acme",
        "doc-1",
        &["group:support"],
        "doc.md",
        "Replacement refund policy content, now processed within seven days.",
    );
    h.pipeline.publish(&second).await.unwrap();
    let after_second = h.store.len().await;

    assert_eq!(after_first, after_second);
}
