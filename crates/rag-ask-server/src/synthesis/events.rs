use serde::Serialize;
use serde_json::json;

use crate::models::{CitationMap, GuardrailDecision};
use crate::utils::freshness::FreshnessStats;

/// Run metrics emitted in the stream `metadata` event and echoed in the
/// non-streaming response.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisMetrics {
    pub tokens_used: usize,
    pub model_used: String,
    pub synthesis_time_ms: u64,
    pub context_truncated: bool,
    pub confidence: f32,
}

/// Typed events flowing from the synthesis producer to the SSE transport.
/// Ordering contract: `chunk` events precede `response_completed`;
/// `citations` may arrive before or after the first `chunk` but always
/// before `response_completed`; `done` is last.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ConnectionOpened,
    Chunk {
        text: String,
        accumulated: String,
    },
    Citations {
        citations: CitationMap,
    },
    Metadata {
        freshness: FreshnessStats,
        metrics: SynthesisMetrics,
    },
    ResponseCompleted {
        answer: String,
        citations: CitationMap,
        guardrail: Option<GuardrailDecision>,
        is_i_dont_know: bool,
    },
    Error {
        message: String,
        code: String,
    },
    Done,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::ConnectionOpened => "connection_opened",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Citations { .. } => "citations",
            StreamEvent::Metadata { .. } => "metadata",
            StreamEvent::ResponseCompleted { .. } => "response_completed",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }

    pub fn data(&self) -> serde_json::Value {
        match self {
            StreamEvent::ConnectionOpened => json!({}),
            StreamEvent::Chunk { text, accumulated } => json!({
                "text": text,
                "accumulated": accumulated,
            }),
            StreamEvent::Citations { citations } => json!({ "citations": citations }),
            StreamEvent::Metadata { freshness, metrics } => json!({
                "freshnessStats": freshness,
                "metrics": metrics,
            }),
            StreamEvent::ResponseCompleted {
                answer,
                citations,
                guardrail,
                is_i_dont_know,
            } => json!({
                "answer": answer,
                "citations": citations,
                "guardrailDecision": guardrail,
                "isIDontKnow": is_i_dont_know,
            }),
            StreamEvent::Error { message, code } => json!({
                "message": message,
                "code": code,
            }),
            StreamEvent::Done => json!({}),
        }
    }

    /// Wire framing: `event:` line, `data:` line, blank-line delimiter.
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.data())
    }
}
