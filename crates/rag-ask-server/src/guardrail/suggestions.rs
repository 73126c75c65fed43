use crate::models::ReasonCode;

/// User-facing suggestions keyed to the refusal reason. Each set carries
/// three to five entries.
pub fn suggestions_for(reason: ReasonCode) -> Vec<String> {
    let items: &[&str] = match reason {
        ReasonCode::NoRelevantDocs => &[
            "Try different keywords or phrasing",
            "Check whether the relevant documents have been ingested",
            "Broaden the question to a wider topic",
            "Verify you have access to the documents you expect",
        ],
        ReasonCode::LowConfidence => &[
            "Rephrase the question more specifically",
            "Split a compound question into smaller ones",
            "Add context such as product names or time ranges",
        ],
        ReasonCode::PoorRetrievalScores => &[
            "Use terminology that appears in the source documents",
            "Ask about one topic at a time",
            "Check spelling of names and technical terms",
        ],
        ReasonCode::ContextInsufficient => &[
            "Ask a narrower question that a single document can answer",
            "Ingest additional documents covering this topic",
            "Rephrase using more specific terms",
        ],
        ReasonCode::OutOfScope => &[
            "This topic does not appear in the available documents",
            "Ask about topics covered by your document corpus",
            "Contact an administrator if the topic should be covered",
        ],
        ReasonCode::AmbiguousQuery => &[
            "Clarify which subject the question refers to",
            "Add distinguishing details to the question",
            "Ask one question at a time",
        ],
    };
    items.iter().map(|s| s.to_string()).collect()
}

/// Short refusal message per reason.
pub fn message_for(reason: ReasonCode) -> String {
    match reason {
        ReasonCode::NoRelevantDocs => {
            "I could not find any relevant documents for this question.".to_string()
        }
        ReasonCode::LowConfidence => {
            "I found some related material but not enough to answer confidently.".to_string()
        }
        ReasonCode::PoorRetrievalScores => {
            "The documents I found do not match this question well enough.".to_string()
        }
        ReasonCode::ContextInsufficient => {
            "The available context is too thin to support a grounded answer.".to_string()
        }
        ReasonCode::OutOfScope => {
            "This question appears to be outside the scope of the available documents.".to_string()
        }
        ReasonCode::AmbiguousQuery => {
            "The question is ambiguous given the documents available.".to_string()
        }
    }
}
