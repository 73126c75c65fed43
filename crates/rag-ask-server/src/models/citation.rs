use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::freshness::Freshness;

/// One cited source. `number` is assigned by first appearance in the
/// synthesized answer text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Chunk id of the cited passage.
    pub id: String,
    /// 1-based citation number in answer order.
    pub number: u32,
    pub source: String,
    pub doc_id: String,
    /// Point id under which the chunk is stored in the vector collection.
    pub qdrant_doc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness: Option<Freshness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
}

/// Citation map keyed by 1-based number. BTreeMap keeps serialization in
/// citation order.
pub type CitationMap = BTreeMap<u32, Citation>;
