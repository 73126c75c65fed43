use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::embedding::EmbeddingService;
use crate::guardrail::{GuardrailConfigMap, GuardrailEngine};
use crate::ingest::{AuditLog, CorpusStatsRegistry, IngestPipeline};
use crate::llm::LlmClientFactory;
use crate::packing::ContextPacker;
use crate::search::{
    HttpReranker, KeywordSearchAdapter, NoopReranker, Reranker, RetrievalService,
    VectorSearchAdapter,
};
use crate::security::{IngestTokenGuard, RateLimiters};
use crate::synthesis::SynthesisOrchestrator;
use crate::text::chunker::AdaptiveChunker;
use crate::text::guard::IngestionGuard;
use crate::text::table_chunker::TableChunker;
use crate::text::token_counter::TokenCounter;
use crate::vectorstore::VectorStore;

/// Application state shared across handlers. Built once at startup; every
/// field is either immutable config or an internally-synchronized service.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub embedding: Arc<EmbeddingService>,
    pub store: Arc<dyn VectorStore>,
    pub retrieval: Arc<RetrievalService>,
    pub guardrail: Arc<GuardrailEngine>,
    pub packer: Arc<ContextPacker>,
    pub synthesis: Arc<SynthesisOrchestrator>,
    pub ingest: Arc<IngestPipeline>,
    pub ingest_token: Arc<IngestTokenGuard>,
    pub rate_limiters: Arc<RateLimiters>,
}

impl AppState {
    /// Wire every service from settings around the given store. The store
    /// comes in from outside so tests can run against the in-memory one.
    pub fn build(settings: Settings, store: Arc<dyn VectorStore>) -> Self {
        let counter = Arc::new(TokenCounter::new(settings.embedding.tokenizer_spec()));
        let chunker = Arc::new(AdaptiveChunker::new(
            counter.clone(),
            settings.embedding.chunking_strategy,
            settings.embedding.overlap_tokens,
        ));

        let embedding = Arc::new(EmbeddingService::new(
            settings.embedding.client_config(),
            chunker.clone(),
        ));

        let corpus_stats = Arc::new(CorpusStatsRegistry::new(settings.ingest.stats_dir.clone()));

        let reranker: Arc<dyn Reranker> = match &settings.reranker.url {
            Some(url) => Arc::new(HttpReranker::new(
                url.clone(),
                Duration::from_secs(settings.reranker.timeout_seconds.unwrap_or(10)),
            )),
            None => Arc::new(NoopReranker),
        };

        let retrieval = Arc::new(RetrievalService::new(
            embedding.clone(),
            VectorSearchAdapter::new(store.clone(), settings.vector_search.clone()),
            KeywordSearchAdapter::new(store.clone(), corpus_stats.clone()),
            reranker,
            settings.retrieval.clone(),
        ));

        let guardrail = Arc::new(GuardrailEngine::new(Arc::new(GuardrailConfigMap::new(
            settings.guardrail.clone(),
        ))));

        let packer = Arc::new(ContextPacker::new(settings.packing.clone()));

        let synthesis = Arc::new(SynthesisOrchestrator::new(
            Arc::new(LlmClientFactory::new(settings.llm.clone())),
            settings.synthesis.clone(),
        ));

        let table_budget = counter.safe_token_limit().min(2_048);
        let ingest = Arc::new(IngestPipeline::new(
            chunker,
            TableChunker::new(counter, table_budget, settings.ingest.repeat_table_header),
            IngestionGuard::new(
                settings.ingest.min_content_length,
                settings.ingest.max_content_length,
                settings.ingest.duplicate_threshold,
            ),
            embedding.clone(),
            store.clone(),
            corpus_stats,
            Arc::new(AuditLog::new()),
        ));

        let ingest_token = Arc::new(IngestTokenGuard::new(settings.ingest.token.clone()));
        let rate_limiters = Arc::new(RateLimiters::new(settings.rate_limit.clone()));

        Self {
            settings,
            embedding,
            store,
            retrieval,
            guardrail,
            packer,
            synthesis,
            ingest,
            ingest_token,
            rate_limiters,
        }
    }
}
