use serde::Serialize;
use tracing::debug;

use crate::models::Chunk;
use crate::utils::similarity::jaccard_similarity;

pub const DEFAULT_MIN_CONTENT_LENGTH: usize = 10;
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10_000;
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.8;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "reason")]
pub enum RejectReason {
    TooShort { length: usize },
    TooLong { length: usize },
    MissingMetadata { field: &'static str },
    NearDuplicate { of: String, similarity: f32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedChunk {
    pub id: String,
    #[serde(flatten)]
    pub reason: RejectReason,
}

#[derive(Debug)]
pub struct GuardReport {
    pub accepted: Vec<Chunk>,
    pub rejected: Vec<RejectedChunk>,
}

/// Pre-persist validation of chunks: length bounds, required metadata, and
/// near-duplicate suppression (first occurrence wins).
pub struct IngestionGuard {
    min_content_length: usize,
    max_content_length: usize,
    duplicate_threshold: f32,
}

impl Default for IngestionGuard {
    fn default() -> Self {
        Self {
            min_content_length: DEFAULT_MIN_CONTENT_LENGTH,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
        }
    }
}

impl IngestionGuard {
    pub fn new(
        min_content_length: usize,
        max_content_length: usize,
        duplicate_threshold: f32,
    ) -> Self {
        Self {
            min_content_length,
            max_content_length,
            duplicate_threshold,
        }
    }

    pub fn apply(&self, chunks: Vec<Chunk>) -> GuardReport {
        let mut accepted: Vec<Chunk> = Vec::with_capacity(chunks.len());
        let mut rejected = Vec::new();

        'outer: for chunk in chunks {
            let trimmed_len = chunk.text.trim().len();

            if trimmed_len < self.min_content_length {
                rejected.push(RejectedChunk {
                    id: chunk.id,
                    reason: RejectReason::TooShort { length: trimmed_len },
                });
                continue;
            }
            if trimmed_len > self.max_content_length {
                rejected.push(RejectedChunk {
                    id: chunk.id,
                    reason: RejectReason::TooLong { length: trimmed_len },
                });
                continue;
            }
            if chunk.metadata.tenant.trim().is_empty() {
                rejected.push(RejectedChunk {
                    id: chunk.id,
                    reason: RejectReason::MissingMetadata { field: "tenant" },
                });
                continue;
            }
            if chunk.metadata.doc_id.trim().is_empty() {
                rejected.push(RejectedChunk {
                    id: chunk.id,
                    reason: RejectReason::MissingMetadata { field: "docId" },
                });
                continue;
            }

            // Quadratic scan is fine at current chunk counts; min-hash/LSH
            // if document sizes ever make this the hot spot.
            for kept in &accepted {
                let similarity = jaccard_similarity(&chunk.text, &kept.text);
                if similarity >= self.duplicate_threshold {
                    rejected.push(RejectedChunk {
                        id: chunk.id,
                        reason: RejectReason::NearDuplicate {
                            of: kept.id.clone(),
                            similarity,
                        },
                    });
                    continue 'outer;
                }
            }

            accepted.push(chunk);
        }

        debug!(
            accepted = accepted.len(),
            rejected = rejected.len(),
            "ingestion guard applied"
        );

        GuardReport { accepted, rejected }
    }
}
