use std::fmt::Write;

use crate::models::{CitationMap, GuardrailDecision, UserContext};
use crate::search::RetrievedChunk;

use super::citations::number_for;

/// Language instruction resolution: explicit user language wins, otherwise
/// English.
fn language_name(ctx: &UserContext) -> &str {
    match ctx.language.as_deref().map(str::to_lowercase).as_deref() {
        Some("de") | Some("german") => "German",
        Some("fr") | Some("french") => "French",
        Some("es") | Some("spanish") => "Spanish",
        Some("ja") | Some("japanese") => "Japanese",
        Some("id") | Some("indonesian") => "Indonesian",
        _ => "English",
    }
}

/// Compose the system prompt: task instructions, the citation-format
/// contract, language selection, and the answerability state.
pub fn build_system_prompt(
    documents: &[RetrievedChunk],
    citations: &CitationMap,
    ctx: &UserContext,
    include_citations: bool,
    guardrail: Option<&GuardrailDecision>,
) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(
        "You are an assistant that answers questions strictly from the provided documents. \
         Answer accurately based on the context below. If the context does not contain the \
         information, say so clearly instead of guessing.\n\n",
    );

    if include_citations {
        prompt.push_str(
            "Cite your sources inline using footnote markers of the form [^N], where N is the \
             document number shown below. Place the marker directly after the statement it \
             supports. Only cite document numbers that exist.\n\n",
        );
    } else {
        prompt.push_str("Do not include citation markers in the answer.\n\n");
    }

    let _ = writeln!(prompt, "Respond in {}.", language_name(ctx));

    if let Some(decision) = guardrail {
        let _ = writeln!(
            prompt,
            "Retrieval confidence for this question is {:.2}; answer within what the documents support.",
            decision.confidence
        );
    }

    prompt.push_str("\nAVAILABLE DOCUMENTS:\n\n");

    for doc in documents {
        let number = number_for(citations, doc);
        let label = match number {
            Some(n) => format!(" n=\"{}\"", n),
            None => String::new(),
        };
        let _ = writeln!(
            prompt,
            "<document{} source=\"{}\"{}>",
            label,
            doc.payload.source,
            doc.payload
                .section_path
                .as_deref()
                .map(|s| format!(" section=\"{}\"", s))
                .unwrap_or_default(),
        );
        prompt.push_str(doc.payload.content.trim());
        prompt.push_str("\n</document>\n\n");
    }

    prompt
}
