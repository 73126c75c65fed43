use std::sync::Arc;

use tracing::debug;

use super::config::GuardrailConfigMap;
use super::suggestions::{message_for, suggestions_for};
use crate::models::{
    AlgorithmScores, GuardrailDecision, IdkResponse, ReasonCode, ScoreStats, UserContext,
};
use crate::search::RetrievedChunk;

// Statistical sub-score blend: mean, max, and score consistency.
const STAT_W_MEAN: f32 = 0.4;
const STAT_W_MAX: f32 = 0.4;
const STAT_W_CONSISTENCY: f32 = 0.2;

// Feature blend: result volume, score spread, reranker confidence.
const ML_W_COUNT: f32 = 0.3;
const ML_W_SPREAD: f32 = 0.3;
const ML_W_RERANK: f32 = 0.4;
const ML_COUNT_SATURATION: f32 = 5.0;

// Final confidence blend across the three algorithms.
const W_STATISTICAL: f32 = 0.4;
const W_THRESHOLD: f32 = 0.3;
const W_ML: f32 = 0.3;

/// Answerability engine. Pure CPU with no await points: it reads a config
/// snapshot, computes score statistics, and gates on per-tenant thresholds.
pub struct GuardrailEngine {
    config: Arc<GuardrailConfigMap>,
}

impl GuardrailEngine {
    pub fn new(config: Arc<GuardrailConfigMap>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Arc<GuardrailConfigMap> {
        &self.config
    }

    pub fn evaluate(
        &self,
        query: &str,
        results: &[RetrievedChunk],
        ctx: &UserContext,
    ) -> GuardrailDecision {
        let tenant_config = self.config.for_tenant(&ctx.tenant_id);

        if !tenant_config.enabled {
            return GuardrailDecision {
                is_answerable: true,
                confidence: 1.0,
                reason_code: None,
                suggestions: None,
                score_stats: None,
                algorithm_scores: None,
                reasoning: Some("Guardrail disabled".to_string()),
            };
        }

        // Missing scores count as zero; everything is clamped to [0, 1].
        let scores: Vec<f32> = results.iter().map(|r| r.relevance()).collect();
        let stats = score_stats(&scores);

        if stats.count == 0 {
            debug!(query, "no retrieval results");
            return GuardrailDecision {
                is_answerable: false,
                confidence: 0.0,
                reason_code: Some(ReasonCode::NoRelevantDocs),
                suggestions: Some(suggestions_for(ReasonCode::NoRelevantDocs)),
                score_stats: Some(stats),
                algorithm_scores: None,
                reasoning: Some("Retrieval returned no results".to_string()),
            };
        }

        let statistical =
            STAT_W_MEAN * stats.mean + STAT_W_MAX * stats.max + STAT_W_CONSISTENCY * (1.0 - stats.std_dev);

        let threshold = if stats.max >= tenant_config.min_top_score
            && stats.mean >= tenant_config.min_mean_score
            && stats.count >= tenant_config.min_result_count
        {
            1.0
        } else {
            0.0
        };

        let count_feature = (stats.count as f32 / ML_COUNT_SATURATION).min(1.0);
        let spread_feature = 1.0 - (stats.max - stats.min).clamp(0.0, 1.0);
        let rerank_feature = rerank_confidence(results).unwrap_or(stats.mean);
        let ml_features = ML_W_COUNT * count_feature
            + ML_W_SPREAD * spread_feature
            + ML_W_RERANK * rerank_feature;

        let confidence = (W_STATISTICAL * statistical + W_THRESHOLD * threshold + W_ML * ml_features)
            .clamp(0.0, 1.0);

        let is_answerable = stats.count >= tenant_config.min_result_count
            && confidence >= tenant_config.min_confidence
            && stats.max >= tenant_config.min_top_score
            && stats.mean >= tenant_config.min_mean_score;

        let algorithm_scores = AlgorithmScores {
            statistical,
            threshold,
            ml_features,
        };

        let reason_code = if is_answerable {
            None
        } else {
            Some(classify_refusal(&stats, confidence, &tenant_config))
        };

        debug!(
            confidence,
            is_answerable,
            mean = stats.mean,
            max = stats.max,
            count = stats.count,
            "guardrail evaluated"
        );

        GuardrailDecision {
            is_answerable,
            confidence,
            suggestions: reason_code.map(suggestions_for),
            reason_code,
            score_stats: Some(stats),
            algorithm_scores: Some(algorithm_scores),
            reasoning: None,
        }
    }

    /// Structured refusal for an unanswerable decision.
    pub fn build_idk(&self, decision: &GuardrailDecision) -> IdkResponse {
        let reason = decision
            .reason_code
            .unwrap_or(ReasonCode::LowConfidence);
        IdkResponse {
            message: message_for(reason),
            reason_code: reason,
            suggestions: decision
                .suggestions
                .clone()
                .unwrap_or_else(|| suggestions_for(reason)),
            confidence: decision.confidence,
            score_stats: decision.score_stats.clone(),
        }
    }
}

fn score_stats(scores: &[f32]) -> ScoreStats {
    if scores.is_empty() {
        return ScoreStats::default();
    }

    let clamped: Vec<f32> = scores.iter().map(|s| s.clamp(0.0, 1.0)).collect();
    let count = clamped.len();
    let sum: f32 = clamped.iter().sum();
    let mean = sum / count as f32;
    let max = clamped.iter().cloned().fold(0.0f32, f32::max);
    let min = clamped.iter().cloned().fold(1.0f32, f32::min);
    let variance = clamped.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / count as f32;

    ScoreStats {
        mean,
        max,
        min,
        std_dev: variance.sqrt(),
        count,
    }
}

fn rerank_confidence(results: &[RetrievedChunk]) -> Option<f32> {
    let reranked: Vec<f32> = results.iter().filter_map(|r| r.rerank_score).collect();
    if reranked.is_empty() {
        None
    } else {
        Some(reranked.iter().sum::<f32>() / reranked.len() as f32)
    }
}

fn classify_refusal(
    stats: &ScoreStats,
    confidence: f32,
    config: &super::config::TenantGuardrailConfig,
) -> ReasonCode {
    if stats.count < config.min_result_count {
        ReasonCode::ContextInsufficient
    } else if stats.max < config.min_top_score / 2.0 {
        // Nothing even close: the corpus does not cover this topic.
        ReasonCode::OutOfScope
    } else if stats.max < config.min_top_score || stats.mean < config.min_mean_score {
        ReasonCode::PoorRetrievalScores
    } else if confidence < config.min_confidence {
        ReasonCode::LowConfidence
    } else {
        ReasonCode::AmbiguousQuery
    }
}
