use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Chunk, DocMeta};

const MAX_CORE_TOKENS: usize = 32;
const MAX_PHRASES: usize = 16;
const MIN_TOKEN_LEN: usize = 3;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "this", "that", "with", "from", "they", "will", "would",
    "there", "their", "what", "which", "when", "where", "into", "than", "then", "them", "these",
    "some", "such", "only", "other", "over", "also", "been", "being", "does", "each", "more",
    "most", "must", "shall", "should", "were", "your", "about", "after", "before", "between",
];

/// Versioned payload stored with every point. Optional fields stay absent in
/// the collection rather than serializing as null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    /// Payload schema version; bump when the shape changes.
    #[serde(default = "default_schema_version")]
    pub schema: u32,
    pub tenant: String,
    pub doc_id: String,
    pub chunk_id: String,
    pub acl: Vec<String>,
    pub content: String,
    pub source: String,
    #[serde(default)]
    pub lang: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub section_path: Option<String>,
    pub order_index: usize,
    pub token_count: usize,
    #[serde(default)]
    pub is_table: bool,
    #[serde(default)]
    pub is_section_header: bool,
    #[serde(default)]
    pub lexical_core_tokens: Vec<String>,
    #[serde(default)]
    pub lexical_phrases: Vec<String>,
    pub lexical_language: String,
}

fn default_schema_version() -> u32 {
    1
}

impl ChunkPayload {
    pub fn from_chunk(chunk: &Chunk, meta: &DocMeta) -> Self {
        let core_tokens = core_tokens(&chunk.text);
        let phrases = phrases(&core_tokens);
        Self {
            schema: default_schema_version(),
            tenant: meta.tenant.clone(),
            doc_id: meta.doc_id.clone(),
            chunk_id: chunk.id.clone(),
            acl: meta.acl.clone(),
            content: chunk.text.clone(),
            source: meta.source.clone(),
            lang: meta.lang.clone(),
            created_at: meta.timestamp,
            modified_at: meta.modified_at,
            url: meta.url.clone(),
            version: meta.version.clone(),
            space_id: meta
                .path
                .as_deref()
                .and_then(|p| p.split('/').find(|s| !s.is_empty()))
                .map(str::to_string),
            title: meta.title.clone(),
            filepath: meta.path.clone(),
            authors: meta.authors.clone(),
            section_path: chunk.section_path.clone(),
            order_index: chunk.metadata.order_index,
            token_count: chunk.token_count,
            is_table: chunk.metadata.is_table,
            is_section_header: chunk.metadata.is_section_header,
            lexical_core_tokens: core_tokens,
            lexical_phrases: phrases,
            lexical_language: meta.lang.clone().unwrap_or_else(|| "en".to_string()),
        }
    }
}

/// Lowercased alphanumeric tokens with stopwords removed, first occurrence
/// order, capped.
pub fn core_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let token = raw.trim().to_lowercase();
        if token.len() < MIN_TOKEN_LEN || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        if seen.insert(token.clone()) {
            out.push(token);
            if out.len() >= MAX_CORE_TOKENS {
                break;
            }
        }
    }

    out
}

/// Adjacent-token bigrams over the core tokens, capped.
fn phrases(tokens: &[String]) -> Vec<String> {
    tokens
        .windows(2)
        .take(MAX_PHRASES)
        .map(|w| format!("{} {}", w[0], w[1]))
        .collect()
}
