use serde::{Deserialize, Serialize};

/// Why a query was judged unanswerable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoRelevantDocs,
    LowConfidence,
    PoorRetrievalScores,
    ContextInsufficient,
    OutOfScope,
    AmbiguousQuery,
}

/// Statistics over the retrieval scores feeding the guardrail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreStats {
    pub mean: f32,
    pub max: f32,
    pub min: f32,
    pub std_dev: f32,
    pub count: usize,
}

/// Per-algorithm sub-scores blended into the final confidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmScores {
    pub statistical: f32,
    pub threshold: f32,
    pub ml_features: f32,
}

/// The answerability verdict for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailDecision {
    pub is_answerable: bool,
    /// Blended confidence in [0, 1].
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_stats: Option<ScoreStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm_scores: Option<AlgorithmScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Structured refusal returned instead of an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdkResponse {
    pub message: String,
    pub reason_code: ReasonCode,
    pub suggestions: Vec<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_stats: Option<ScoreStats>,
}
