use serde::{Deserialize, Serialize};

use crate::models::citation::CitationMap;
use crate::models::guardrail::{GuardrailDecision, IdkResponse};
use crate::models::user::UserContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    #[default]
    Markdown,
    Plain,
}

/// Body of `POST /ask` and `POST /ask/stream`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub query: String,
    pub user_context: UserContext,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default = "default_true")]
    pub include_citations: bool,
    #[serde(default)]
    pub answer_format: AnswerFormat,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl AskRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".to_string());
        }
        self.user_context.validate()
    }
}

/// A successful grounded answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub answer: String,
    pub citations: CitationMap,
    pub tokens_used: usize,
    pub model_used: String,
    pub confidence: f32,
    pub context_truncated: bool,
    pub synthesis_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail: Option<GuardrailDecision>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

/// `POST /ask` returns either a grounded answer or a structured refusal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AskOutcome {
    Answer(AnswerResponse),
    #[serde(rename = "iDontKnow")]
    Idk(IdkResponse),
}
