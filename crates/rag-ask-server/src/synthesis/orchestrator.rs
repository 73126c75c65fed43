use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::llm::{estimate_tokens, CompletionRequest, LlmClientFactory, LlmError};
use crate::models::{
    AnswerFormat, AnswerResponse, CitationMap, GuardrailDecision, IdkResponse, UserContext,
};
use crate::search::RetrievedChunk;
use crate::utils::error::ApiError;

use super::citations::{
    build_citation_map, format_text_with_citations, freshness_stats, renumber_by_appearance,
    strip_citations, validate_citations,
};
use super::events::{StreamEvent, SynthesisMetrics};
use super::prompt::build_system_prompt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Context truncation budget in estimated tokens.
    pub max_context_tokens: usize,
    /// Total-response deadline for one streamed answer.
    pub stream_deadline_seconds: u64,
    /// Bounded event channel between producer and SSE transport.
    pub channel_capacity: usize,
    pub default_max_tokens: usize,
    pub temperature: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 6_000,
            stream_deadline_seconds: 120,
            channel_capacity: 32,
            default_max_tokens: 1_024,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub query: String,
    pub documents: Vec<RetrievedChunk>,
    pub user_context: UserContext,
    pub include_citations: bool,
    pub answer_format: AnswerFormat,
    pub max_tokens: Option<usize>,
    pub guardrail: Option<GuardrailDecision>,
    /// Truncation already applied upstream (context packer).
    pub context_truncated: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
struct Prepared {
    completion: CompletionRequest,
    citations: CitationMap,
    context_truncated: bool,
}

/// Drives one answer: validates, budgets the context, builds the citation
/// map and prompt, invokes the tenant's LLM client, and post-processes
/// citations. Streaming produces typed events on a bounded channel; the
/// HTTP layer serializes them to SSE.
#[derive(Clone)]
pub struct SynthesisOrchestrator {
    factory: Arc<LlmClientFactory>,
    config: SynthesisConfig,
}

impl SynthesisOrchestrator {
    pub fn new(factory: Arc<LlmClientFactory>, config: SynthesisConfig) -> Self {
        Self { factory, config }
    }

    fn prepare(&self, request: &SynthesisRequest) -> Result<Prepared, ApiError> {
        if request.documents.is_empty() {
            return Err(ApiError::NoDocuments);
        }
        request
            .user_context
            .validate()
            .map_err(ApiError::InvalidUserContext)?;

        let mut documents = request.documents.clone();
        documents.sort_by(|a, b| {
            b.fusion_score
                .partial_cmp(&a.fusion_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        // Context-length truncation on top of whatever the packer already did.
        let mut kept = Vec::with_capacity(documents.len());
        let mut context_tokens = 0usize;
        let mut context_truncated = request.context_truncated;
        for doc in documents {
            let tokens = estimate_tokens(&doc.payload.content);
            if context_tokens + tokens > self.config.max_context_tokens {
                context_truncated = true;
                continue;
            }
            context_tokens += tokens;
            kept.push(doc);
        }
        if kept.is_empty() {
            return Err(ApiError::NoDocuments);
        }

        let citations = build_citation_map(&kept);
        let system = build_system_prompt(
            &kept,
            &citations,
            &request.user_context,
            request.include_citations,
            request.guardrail.as_ref(),
        );

        Ok(Prepared {
            completion: CompletionRequest {
                system,
                user: request.query.clone(),
                max_tokens: request.max_tokens.unwrap_or(self.config.default_max_tokens),
                temperature: self.config.temperature,
            },
            citations,
            context_truncated,
        })
    }

    /// Non-streaming synthesis.
    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<AnswerResponse, ApiError> {
        let started = Instant::now();
        let prepared = self.prepare(&request)?;
        let client = self
            .factory
            .client_for(&request.user_context.tenant_id)
            .map_err(|e| ApiError::LlmProvider(e.to_string()))?;

        let raw = self.complete_with_retry(&*client, &prepared.completion).await?;

        let (answer, citations) =
            self.post_process(&raw, &prepared.citations, request.answer_format, request.include_citations)?;

        let confidence = compute_confidence(&request.documents, request.guardrail.as_ref());

        Ok(AnswerResponse {
            tokens_used: estimate_tokens(&prepared.completion.system) + estimate_tokens(&answer),
            model_used: client.model().to_string(),
            confidence,
            context_truncated: prepared.context_truncated,
            synthesis_time_ms: started.elapsed().as_millis() as u64,
            answer,
            citations,
            guardrail: request.guardrail,
            warnings: request.warnings,
        })
    }

    /// Streaming synthesis. Chunk events precede `response_completed`,
    /// `citations` precedes `response_completed`, and `done` is last;
    /// dropping the receiver cancels the producer and releases the provider
    /// connection.
    pub fn synthesize_stream(&self, request: SynthesisRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let orchestrator = self.clone();

        tokio::spawn(async move {
            orchestrator.run_stream(request, tx).await;
        });

        rx
    }

    /// Stream shape for an unanswerable query: no synthesis, a completed
    /// response carrying the refusal.
    pub fn stream_idk(
        &self,
        decision: GuardrailDecision,
        idk: IdkResponse,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        tokio::spawn(async move {
            let _ = tx.send(StreamEvent::ConnectionOpened).await;
            let _ = tx
                .send(StreamEvent::ResponseCompleted {
                    answer: idk.message.clone(),
                    citations: CitationMap::new(),
                    guardrail: Some(decision),
                    is_i_dont_know: true,
                })
                .await;
            let _ = tx.send(StreamEvent::Done).await;
        });

        rx
    }

    async fn run_stream(&self, request: SynthesisRequest, tx: mpsc::Sender<StreamEvent>) {
        let started = Instant::now();

        if tx.send(StreamEvent::ConnectionOpened).await.is_err() {
            return;
        }

        let prepared = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                        code: e.kind().to_string(),
                    })
                    .await;
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
        };

        // Citations may precede the first chunk; they must precede
        // response_completed.
        if tx
            .send(StreamEvent::Citations {
                citations: prepared.citations.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        let client = match self.factory.client_for(&request.user_context.tenant_id) {
            Ok(client) => client,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                        code: "LLMProviderError".to_string(),
                    })
                    .await;
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
        };

        let mut stream = match client.stream(&prepared.completion).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                        code: "LLMProviderError".to_string(),
                    })
                    .await;
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
        };

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.stream_deadline_seconds);
        let mut accumulated = String::new();

        loop {
            let next = tokio::time::timeout_at(deadline, stream.next()).await;
            match next {
                Ok(Some(Ok(text))) => {
                    accumulated.push_str(&text);
                    if tx
                        .send(StreamEvent::Chunk {
                            text,
                            accumulated: accumulated.clone(),
                        })
                        .await
                        .is_err()
                    {
                        // Client went away; drop the provider stream.
                        return;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "llm stream error");
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: e.to_string(),
                            code: "LLMProviderError".to_string(),
                        })
                        .await;
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: "streaming deadline exceeded".to_string(),
                            code: "Timeout".to_string(),
                        })
                        .await;
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
            }
        }

        let (answer, citations) = match self.post_process(
            &accumulated,
            &prepared.citations,
            request.answer_format,
            request.include_citations,
        ) {
            Ok(result) => result,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                        code: e.kind().to_string(),
                    })
                    .await;
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
        };

        let confidence = compute_confidence(&request.documents, request.guardrail.as_ref());
        let metrics = SynthesisMetrics {
            tokens_used: estimate_tokens(&prepared.completion.system) + estimate_tokens(&answer),
            model_used: client.model().to_string(),
            synthesis_time_ms: started.elapsed().as_millis() as u64,
            context_truncated: prepared.context_truncated,
            confidence,
        };
        let freshness = freshness_stats(&answer, &citations);

        let _ = tx
            .send(StreamEvent::Metadata { freshness, metrics })
            .await;
        let _ = tx
            .send(StreamEvent::ResponseCompleted {
                answer,
                citations,
                guardrail: request.guardrail,
                is_i_dont_know: false,
            })
            .await;
        let _ = tx.send(StreamEvent::Done).await;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stream completed"
        );
    }

    fn post_process(
        &self,
        raw: &str,
        citations: &CitationMap,
        format: AnswerFormat,
        include_citations: bool,
    ) -> Result<(String, CitationMap), ApiError> {
        if format == AnswerFormat::Plain || !include_citations {
            return Ok((strip_citations(raw), citations.clone()));
        }

        let formatted = format_text_with_citations(raw, citations);
        let (answer, renumbered) = renumber_by_appearance(&formatted, citations);

        validate_citations(&answer, &renumbered).map_err(|invalid| {
            ApiError::InvalidCitations(format!("unresolved citation numbers {:?}", invalid))
        })?;

        Ok((answer, renumbered))
    }

    async fn complete_with_retry(
        &self,
        client: &dyn crate::llm::LlmClient,
        request: &CompletionRequest,
    ) -> Result<String, ApiError> {
        match client.complete(request).await {
            Ok(answer) => Ok(answer),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "llm call failed, retrying once");
                client
                    .complete(request)
                    .await
                    .map_err(|e| map_llm_error(&e))
            }
            Err(e) => Err(map_llm_error(&e)),
        }
    }
}

fn map_llm_error(error: &LlmError) -> ApiError {
    match error {
        LlmError::Http { status, .. } if *status == 429 || *status >= 500 => {
            ApiError::UpstreamUnavailable(error.to_string())
        }
        _ => ApiError::LlmProvider(error.to_string()),
    }
}

/// Confidence from per-document quality and retrieval scores, blended with
/// the guardrail verdict when present.
fn compute_confidence(documents: &[RetrievedChunk], guardrail: Option<&GuardrailDecision>) -> f32 {
    if documents.is_empty() {
        return 0.0;
    }

    let mean_relevance: f32 =
        documents.iter().map(|d| d.relevance()).sum::<f32>() / documents.len() as f32;
    let quality: f32 = documents
        .iter()
        .map(|d| (d.payload.content.len() as f32 / 400.0).min(1.0))
        .sum::<f32>()
        / documents.len() as f32;
    let guard = guardrail.map(|g| g.confidence).unwrap_or(mean_relevance);

    (0.5 * mean_relevance + 0.3 * quality + 0.2 * guard).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClientConfig;
    use crate::models::{Chunk, ChunkMetadata, DocMeta};
    use crate::search::SearchType;
    use crate::vectorstore::ChunkPayload;
    use chrono::Utc;

    fn factory() -> Arc<LlmClientFactory> {
        Arc::new(LlmClientFactory::new(LlmClientConfig {
            provider: "vllm".into(),
            model: "test-model".into(),
            temperature: 0.2,
            max_tokens: 256,
            base_url: Some("http://127.0.0.1:9".into()),
            api_key: None,
            streaming: true,
            timeout_ms: 500,
        }))
    }

    fn doc(id: &str, score: f32, content: &str) -> RetrievedChunk {
        let meta = DocMeta {
            tenant: "t".into(),
            doc_id: format!("doc-{}", id),
            source: format!("{}.md", id),
            sha256: "0".repeat(64),
            acl: vec!["u".into()],
            timestamp: Utc::now(),
            modified_at: None,
            version: None,
            lang: None,
            title: None,
            path: None,
            url: None,
            authors: None,
            tags: None,
            deleted: false,
        };
        let chunk = Chunk {
            id: id.into(),
            text: content.into(),
            token_count: content.len() / 4,
            character_count: content.len(),
            start_index: 0,
            end_index: content.len(),
            section_path: None,
            metadata: ChunkMetadata {
                tenant: "t".into(),
                doc_id: format!("doc-{}", id),
                order_index: 0,
                is_table: false,
                is_section_header: false,
            },
        };
        RetrievedChunk {
            id: id.into(),
            point_id: crate::models::chunk::point_id_for(id),
            payload: ChunkPayload::from_chunk(&chunk, &meta),
            vector: None,
            vector_score: Some(score),
            keyword_score: None,
            fusion_score: score,
            rerank_score: None,
            rank: 1,
            search_type: SearchType::VectorOnly,
        }
    }

    fn request(documents: Vec<RetrievedChunk>) -> SynthesisRequest {
        SynthesisRequest {
            query: "what is the policy?".into(),
            documents,
            user_context: UserContext {
                id: "u".into(),
                tenant_id: "t".into(),
                group_ids: vec![],
                language: None,
            },
            include_citations: true,
            answer_format: AnswerFormat::Markdown,
            max_tokens: None,
            guardrail: None,
            context_truncated: false,
            warnings: vec![],
        }
    }

    fn orchestrator() -> SynthesisOrchestrator {
        SynthesisOrchestrator::new(factory(), SynthesisConfig::default())
    }

    #[test]
    fn empty_documents_fail_validation() {
        let err = orchestrator().prepare(&request(vec![])).unwrap_err();
        assert!(matches!(err, ApiError::NoDocuments));
    }

    #[test]
    fn invalid_user_context_fails_validation() {
        let mut req = request(vec![doc("a", 0.8, "long enough content to include here")]);
        req.user_context.id = "".into();
        let err = orchestrator().prepare(&req).unwrap_err();
        assert!(matches!(err, ApiError::InvalidUserContext(_)));
    }

    #[test]
    fn context_truncates_by_estimated_tokens() {
        let orchestrator = SynthesisOrchestrator::new(
            factory(),
            SynthesisConfig {
                max_context_tokens: 30,
                ..Default::default()
            },
        );
        // ~25 estimated tokens each; only one fits the 30-token budget
        let big = "x".repeat(100);
        let req = request(vec![doc("a", 0.9, &big), doc("b", 0.8, &big)]);
        let prepared = orchestrator.prepare(&req).unwrap();
        assert!(prepared.context_truncated);
        assert_eq!(prepared.citations.len(), 1);
    }

    #[test]
    fn documents_sorted_by_fusion_score_for_citation_order() {
        let req = request(vec![
            doc("low", 0.2, "content of the lower scored document"),
            doc("high", 0.9, "content of the higher scored document"),
        ]);
        let prepared = orchestrator().prepare(&req).unwrap();
        assert_eq!(prepared.citations[&1].source, "high.md");
        assert_eq!(prepared.citations[&2].source, "low.md");
    }

    #[test]
    fn post_process_rejects_unknown_markers_in_plain_path_only() {
        let orch = orchestrator();
        let req = request(vec![doc("a", 0.8, "long enough content to include here")]);
        let prepared = orch.prepare(&req).unwrap();

        // Markdown path removes invalid markers, so validation passes
        let (answer, _) = orch
            .post_process("claim [^1] junk [^9]", &prepared.citations, AnswerFormat::Markdown, true)
            .unwrap();
        assert!(answer.contains("[^1]"));
        assert!(!answer.contains("[^9]"));

        // Plain path strips everything
        let (plain, _) = orch
            .post_process("claim [^1] junk [^9]", &prepared.citations, AnswerFormat::Plain, true)
            .unwrap();
        assert!(!plain.contains("[^"));
    }

    #[test]
    fn confidence_blends_relevance_and_quality() {
        let long = "c".repeat(400);
        let high = compute_confidence(&[doc("a", 0.9, &long)], None);
        let low = compute_confidence(&[doc("a", 0.2, "short but cited text")], None);
        assert!(high > low);
        assert!(high <= 1.0);
        assert_eq!(compute_confidence(&[], None), 0.0);
    }

    #[tokio::test]
    async fn idk_stream_has_completed_then_done() {
        let orch = Arc::new(orchestrator());
        let decision = GuardrailDecision {
            is_answerable: false,
            confidence: 0.0,
            reason_code: Some(crate::models::ReasonCode::NoRelevantDocs),
            suggestions: None,
            score_stats: None,
            algorithm_scores: None,
            reasoning: None,
        };
        let idk = IdkResponse {
            message: "no relevant documents".into(),
            reason_code: crate::models::ReasonCode::NoRelevantDocs,
            suggestions: vec!["rephrase".into()],
            confidence: 0.0,
            score_stats: None,
        };

        let mut rx = orch.stream_idk(decision, idk);
        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.name());
        }
        assert_eq!(names, vec!["connection_opened", "response_completed", "done"]);
    }

    #[tokio::test]
    async fn stream_surfaces_provider_failure_as_error_then_done() {
        // base_url points at a closed port, so opening the stream fails
        let orch = Arc::new(orchestrator());
        let req = request(vec![doc("a", 0.8, "long enough content to include here")]);
        let mut rx = orch.synthesize_stream(req);

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.name().to_string());
        }
        assert_eq!(names.first().map(String::as_str), Some("connection_opened"));
        assert!(names.contains(&"error".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("done"));
        // chunk events never follow the terminal pair
        assert!(!names.contains(&"chunk".to_string()));
    }
}
