use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::search::RetrievedChunk;
use crate::utils::similarity::cosine_similarity;
use crate::vectorstore::payload::core_tokens;

/// Fraction of query core tokens that must appear in a chunk for the
/// answerability bonus.
const DIRECT_ANSWER_COVERAGE: f32 = 0.75;
/// How many neighbors besides the section header a reunion bundle may pull.
const REUNION_ADJACENT: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingConfig {
    pub token_budget: usize,
    pub per_doc_cap: usize,
    pub per_section_cap: usize,
    pub novelty_alpha: f32,
    pub answerability_bonus: f32,
    pub section_reunification: bool,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            token_budget: 8_000,
            per_doc_cap: 2,
            per_section_cap: 2,
            novelty_alpha: 0.5,
            answerability_bonus: 0.05,
            section_reunification: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackTrace {
    pub selected_ids: Vec<String>,
    pub token_counts: Vec<usize>,
    pub scores: Vec<f32>,
    pub caps_applied: Vec<String>,
    pub novelty_scores: Vec<f32>,
    pub dropped_reasons: Vec<DroppedChunk>,
    pub section_reunions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DroppedChunk {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PackedContext {
    pub chunks: Vec<RetrievedChunk>,
    pub total_tokens: usize,
    pub truncated: bool,
    pub trace: PackTrace,
}

/// Packs retrieval results into an LLM context under a token budget with
/// per-document and per-section caps, a novelty filter, and optional
/// section reunification.
pub struct ContextPacker {
    config: PackingConfig,
}

impl ContextPacker {
    pub fn new(config: PackingConfig) -> Self {
        Self { config }
    }

    pub fn pack(&self, query: &str, candidates: &[RetrievedChunk]) -> PackedContext {
        let query_tokens = core_tokens(query);

        // Selection order: boosted fusion score, descending.
        let mut ordered: Vec<&RetrievedChunk> = candidates.iter().collect();
        let boost = |chunk: &RetrievedChunk| -> f32 {
            let bonus = if is_direct_answer(&query_tokens, &chunk.payload.content) {
                self.config.answerability_bonus
            } else {
                0.0
            };
            chunk.fusion_score + bonus
        };
        ordered.sort_by(|a, b| {
            boost(b)
                .partial_cmp(&boost(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut trace = PackTrace::default();
        let mut selected: Vec<RetrievedChunk> = Vec::new();
        let mut selected_ids: HashSet<String> = HashSet::new();
        let mut doc_counts: HashMap<String, usize> = HashMap::new();
        let mut section_counts: HashMap<String, usize> = HashMap::new();
        let mut total_tokens = 0usize;

        for chunk in &ordered {
            if selected_ids.contains(&chunk.id) {
                continue;
            }

            let doc_key = chunk.payload.doc_id.clone();
            if doc_counts.get(&doc_key).copied().unwrap_or(0) >= self.config.per_doc_cap {
                trace.caps_applied.push(format!("doc:{}", doc_key));
                trace.dropped_reasons.push(DroppedChunk {
                    id: chunk.id.clone(),
                    reason: "per-doc cap".to_string(),
                });
                continue;
            }

            let section_key = section_key(chunk);
            if section_counts.get(&section_key).copied().unwrap_or(0)
                >= self.config.per_section_cap
            {
                trace.caps_applied.push(format!("section:{}", section_key));
                trace.dropped_reasons.push(DroppedChunk {
                    id: chunk.id.clone(),
                    reason: "per-section cap".to_string(),
                });
                continue;
            }

            let novelty = self.novelty(chunk, &selected);
            trace.novelty_scores.push(novelty);
            if novelty < 0.0 {
                trace.dropped_reasons.push(DroppedChunk {
                    id: chunk.id.clone(),
                    reason: "novelty below zero".to_string(),
                });
                continue;
            }

            let tokens = chunk.payload.token_count;
            if total_tokens + tokens > self.config.token_budget {
                let section_used = section_counts.get(&section_key).copied().unwrap_or(0);
                if self.config.section_reunification && section_used > 0 {
                    let remaining = self.config.token_budget - total_tokens;
                    // Bundle members share the trigger chunk's doc and
                    // section, so both caps bound the bundle size. Both
                    // checks above passed, so at least one slot is open.
                    let doc_used = doc_counts.get(&doc_key).copied().unwrap_or(0);
                    let open_slots = self
                        .config
                        .per_doc_cap
                        .saturating_sub(doc_used)
                        .min(self.config.per_section_cap.saturating_sub(section_used));
                    let bundle =
                        reunion_bundle(chunk, &ordered, &selected_ids, remaining, open_slots);
                    if !bundle.is_empty() {
                        for member in bundle {
                            let member_tokens = member.payload.token_count;
                            total_tokens += member_tokens;
                            *doc_counts.entry(member.payload.doc_id.clone()).or_insert(0) += 1;
                            *section_counts.entry(section_key.clone()).or_insert(0) += 1;
                            selected_ids.insert(member.id.clone());
                            trace.selected_ids.push(member.id.clone());
                            trace.token_counts.push(member_tokens);
                            trace.scores.push(member.fusion_score);
                            trace.section_reunions.push(member.id.clone());
                            selected.push(member.clone());
                        }
                        continue;
                    }
                }
                trace.dropped_reasons.push(DroppedChunk {
                    id: chunk.id.clone(),
                    reason: "token budget".to_string(),
                });
                continue;
            }

            total_tokens += tokens;
            *doc_counts.entry(doc_key).or_insert(0) += 1;
            *section_counts.entry(section_key).or_insert(0) += 1;
            selected_ids.insert(chunk.id.clone());
            trace.selected_ids.push(chunk.id.clone());
            trace.token_counts.push(tokens);
            trace.scores.push(chunk.fusion_score);
            selected.push((*chunk).clone());
        }

        let truncated = total_tokens >= self.config.token_budget;

        debug!(
            selected = selected.len(),
            total_tokens,
            truncated,
            dropped = trace.dropped_reasons.len(),
            "packed context"
        );

        PackedContext {
            chunks: selected,
            total_tokens,
            truncated,
            trace,
        }
    }

    /// `novelty(c) = 1 - alpha * max cosine(c, selected)`. Chunks without a
    /// vector (keyword-only hits) stay neutral.
    fn novelty(&self, chunk: &RetrievedChunk, selected: &[RetrievedChunk]) -> f32 {
        let Some(vector) = &chunk.vector else {
            return 1.0;
        };
        let mut max_similarity = 0.0f32;
        for other in selected {
            if let Some(other_vector) = &other.vector {
                if let Ok(similarity) = cosine_similarity(vector, other_vector) {
                    max_similarity = max_similarity.max(similarity);
                }
            }
        }
        1.0 - self.config.novelty_alpha * max_similarity
    }
}

fn section_key(chunk: &RetrievedChunk) -> String {
    format!(
        "{}#{}",
        chunk.payload.doc_id,
        chunk.payload.section_path.as_deref().unwrap_or("")
    )
}

fn is_direct_answer(query_tokens: &[String], content: &str) -> bool {
    if query_tokens.is_empty() {
        return false;
    }
    let content_lower = content.to_lowercase();
    let hits = query_tokens
        .iter()
        .filter(|t| content_lower.contains(t.as_str()))
        .count();
    hits as f32 / query_tokens.len() as f32 >= DIRECT_ANSWER_COVERAGE
}

/// Alternative selection unit for an over-budget chunk whose section is
/// already in the context: the section header plus the closest neighbors by
/// order index, as many as fit the remaining budget and the open per-doc /
/// per-section slots.
fn reunion_bundle<'a>(
    chunk: &RetrievedChunk,
    ordered: &[&'a RetrievedChunk],
    selected_ids: &HashSet<String>,
    remaining_budget: usize,
    open_slots: usize,
) -> Vec<&'a RetrievedChunk> {
    if open_slots == 0 {
        return Vec::new();
    }

    let section = section_key(chunk);

    let mut section_candidates: Vec<&&RetrievedChunk> = ordered
        .iter()
        .filter(|c| {
            section_key(c) == section && !selected_ids.contains(&c.id) && c.id != chunk.id
        })
        .collect();

    // Header first, then by order-index proximity to the over-budget chunk.
    section_candidates.sort_by_key(|c| {
        let proximity = c
            .payload
            .order_index
            .abs_diff(chunk.payload.order_index);
        (!c.payload.is_section_header, proximity, c.id.clone())
    });

    let mut bundle = Vec::new();
    let mut budget = remaining_budget;
    let mut adjacents = 0usize;

    for candidate in section_candidates {
        if bundle.len() >= open_slots {
            break;
        }
        let is_header = candidate.payload.is_section_header;
        if !is_header && adjacents >= REUNION_ADJACENT {
            continue;
        }
        if candidate.payload.token_count <= budget {
            budget -= candidate.payload.token_count;
            if !is_header {
                adjacents += 1;
            }
            bundle.push(*candidate);
        }
    }

    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, DocMeta};
    use crate::search::SearchType;
    use crate::vectorstore::ChunkPayload;
    use chrono::Utc;

    struct Spec<'a> {
        id: &'a str,
        doc: &'a str,
        section: &'a str,
        tokens: usize,
        fusion: f32,
        order: usize,
    }

    fn chunk(spec: Spec<'_>) -> RetrievedChunk {
        let meta = DocMeta {
            tenant: "t".into(),
            doc_id: spec.doc.into(),
            source: "s".into(),
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
        let c = Chunk {
            id: spec.id.into(),
            text: format!("content for {}", spec.id),
            token_count: spec.tokens,
            character_count: 20,
            start_index: 0,
            end_index: 20,
            section_path: Some(spec.section.into()),
            metadata: ChunkMetadata {
                tenant: "t".into(),
                doc_id: spec.doc.into(),
                order_index: spec.order,
                is_table: false,
                is_section_header: false,
            },
        };
        RetrievedChunk {
            id: spec.id.into(),
            point_id: crate::models::chunk::point_id_for(spec.id),
            payload: ChunkPayload::from_chunk(&c, &meta),
            vector: None,
            vector_score: Some(0.8),
            keyword_score: None,
            fusion_score: spec.fusion,
            rerank_score: None,
            rank: 1,
            search_type: SearchType::VectorOnly,
        }
    }

    fn packer(budget: usize) -> ContextPacker {
        ContextPacker::new(PackingConfig {
            token_budget: budget,
            ..Default::default()
        })
    }

    #[test]
    fn respects_token_budget() {
        let candidates = vec![
            chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 400, fusion: 0.9, order: 0 }),
            chunk(Spec { id: "b", doc: "d2", section: "s1", tokens: 400, fusion: 0.8, order: 0 }),
            chunk(Spec { id: "c", doc: "d3", section: "s1", tokens: 400, fusion: 0.7, order: 0 }),
        ];
        let packed = packer(900).pack("query", &candidates);
        assert_eq!(packed.chunks.len(), 2);
        assert!(packed.total_tokens <= 900);
        assert!(packed
            .trace
            .dropped_reasons
            .iter()
            .any(|d| d.reason == "token budget"));
    }

    #[test]
    fn enforces_per_doc_cap() {
        let candidates = vec![
            chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 10, fusion: 0.9, order: 0 }),
            chunk(Spec { id: "b", doc: "d1", section: "s2", tokens: 10, fusion: 0.8, order: 1 }),
            chunk(Spec { id: "c", doc: "d1", section: "s3", tokens: 10, fusion: 0.7, order: 2 }),
        ];
        let packed = packer(8000).pack("query", &candidates);
        assert_eq!(packed.chunks.len(), 2);
        assert!(packed
            .trace
            .caps_applied
            .iter()
            .any(|c| c == "doc:d1"));
    }

    #[test]
    fn enforces_per_section_cap() {
        let candidates = vec![
            chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 10, fusion: 0.9, order: 0 }),
            chunk(Spec { id: "b", doc: "d2", section: "s1", tokens: 10, fusion: 0.8, order: 1 }),
            chunk(Spec { id: "c", doc: "d1", section: "s1", tokens: 10, fusion: 0.7, order: 2 }),
        ];
        // Different docs share a section name; the cap keys on (doc, section)
        let packed = packer(8000).pack("query", &candidates);
        assert_eq!(packed.chunks.len(), 3);

        let same_doc = vec![
            chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 10, fusion: 0.9, order: 0 }),
            chunk(Spec { id: "b", doc: "d1", section: "s1", tokens: 10, fusion: 0.8, order: 1 }),
            chunk(Spec { id: "c", doc: "d1", section: "s1", tokens: 10, fusion: 0.7, order: 2 }),
        ];
        let packed = packer(8000).pack("query", &same_doc);
        assert_eq!(packed.chunks.len(), 2);
    }

    #[test]
    fn selection_follows_boosted_score_order() {
        let mut high = chunk(Spec { id: "high", doc: "d1", section: "s1", tokens: 10, fusion: 0.5, order: 0 });
        high.payload.content = "unrelated text".into();
        let mut boosted = chunk(Spec { id: "boosted", doc: "d2", section: "s1", tokens: 10, fusion: 0.48, order: 0 });
        boosted.payload.content = "the refund policy window explained".into();

        let packed = packer(15).pack("refund policy window", &[high, boosted]);
        // bonus 0.05 lifts 0.48 above 0.5; only one fits the budget
        assert_eq!(packed.chunks[0].id, "boosted");
    }

    #[test]
    fn redundant_vectors_are_penalized() {
        let mut a = chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 10, fusion: 0.9, order: 0 });
        a.vector = Some(vec![1.0, 0.0]);
        let mut b = chunk(Spec { id: "b", doc: "d2", section: "s1", tokens: 10, fusion: 0.8, order: 0 });
        b.vector = Some(vec![1.0, 0.0]);

        let packer = ContextPacker::new(PackingConfig {
            novelty_alpha: 1.5,
            ..Default::default()
        });
        let packed = packer.pack("query", &[a, b]);
        // alpha 1.5 with cosine 1.0 drives novelty to -0.5
        assert_eq!(packed.chunks.len(), 1);
        assert!(packed
            .trace
            .dropped_reasons
            .iter()
            .any(|d| d.reason == "novelty below zero"));
    }

    #[test]
    fn truncated_flag_tracks_budget_exhaustion() {
        let candidates = vec![
            chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 500, fusion: 0.9, order: 0 }),
            chunk(Spec { id: "b", doc: "d2", section: "s1", tokens: 500, fusion: 0.8, order: 0 }),
        ];
        let packed = packer(1000).pack("query", &candidates);
        assert!(packed.truncated);

        let packed = packer(5000).pack("query", &candidates);
        assert!(!packed.truncated);
    }

    #[test]
    fn reunion_swaps_in_section_neighbors() {
        let mut header = chunk(Spec { id: "header", doc: "d1", section: "s1", tokens: 20, fusion: 0.2, order: 0 });
        header.payload.is_section_header = true;
        let a = chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 100, fusion: 0.9, order: 1 });
        let big = chunk(Spec { id: "big", doc: "d1", section: "s1", tokens: 500, fusion: 0.85, order: 2 });
        let near = chunk(Spec { id: "near", doc: "d1", section: "s1", tokens: 30, fusion: 0.1, order: 3 });

        let packer = ContextPacker::new(PackingConfig {
            token_budget: 200,
            per_doc_cap: 10,
            per_section_cap: 10,
            section_reunification: true,
            ..Default::default()
        });
        let packed = packer.pack("query", &[header, a, big, near]);

        // "big" itself cannot fit; its header and near neighbor swap in
        assert!(!packed.trace.section_reunions.is_empty());
        let ids: Vec<&str> = packed.chunks.iter().map(|c| c.id.as_str()).collect();
        assert!(ids.contains(&"header"));
        assert!(!ids.contains(&"big"));
        assert!(packed.total_tokens <= 200);
    }

    #[test]
    fn reunion_never_exceeds_section_cap() {
        let mut header = chunk(Spec { id: "header", doc: "d1", section: "s1", tokens: 20, fusion: 0.2, order: 0 });
        header.payload.is_section_header = true;
        let a = chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 100, fusion: 0.9, order: 1 });
        let big = chunk(Spec { id: "big", doc: "d1", section: "s1", tokens: 500, fusion: 0.85, order: 2 });
        let near = chunk(Spec { id: "near", doc: "d1", section: "s1", tokens: 30, fusion: 0.1, order: 3 });

        let packer = ContextPacker::new(PackingConfig {
            token_budget: 200,
            per_doc_cap: 10,
            per_section_cap: 2,
            section_reunification: true,
            ..Default::default()
        });
        let packed = packer.pack("query", &[header, a, big, near]);

        // Reunification fires (one slot open in the section) but the bundle
        // stops at the cap: header joins, "near" stays out.
        assert!(!packed.trace.section_reunions.is_empty());
        let ids: Vec<&str> = packed.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "header"]);

        let mut per_section: HashMap<String, usize> = HashMap::new();
        for selected in &packed.chunks {
            *per_section.entry(section_key(selected)).or_default() += 1;
        }
        assert!(per_section.values().all(|count| *count <= 2));
        assert!(packed.total_tokens <= 200);
    }

    #[test]
    fn reunion_never_exceeds_doc_cap() {
        // Section cap is loose; the per-doc cap is the binding limit.
        let mut header = chunk(Spec { id: "header", doc: "d1", section: "s1", tokens: 20, fusion: 0.2, order: 0 });
        header.payload.is_section_header = true;
        let a = chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 100, fusion: 0.9, order: 1 });
        let big = chunk(Spec { id: "big", doc: "d1", section: "s1", tokens: 500, fusion: 0.85, order: 2 });
        let near = chunk(Spec { id: "near", doc: "d1", section: "s1", tokens: 30, fusion: 0.1, order: 3 });

        let packer = ContextPacker::new(PackingConfig {
            token_budget: 200,
            per_doc_cap: 2,
            per_section_cap: 10,
            section_reunification: true,
            ..Default::default()
        });
        let packed = packer.pack("query", &[header, a, big, near]);

        let mut per_doc: HashMap<&str, usize> = HashMap::new();
        for selected in &packed.chunks {
            *per_doc.entry(selected.payload.doc_id.as_str()).or_default() += 1;
        }
        assert!(per_doc.values().all(|count| *count <= 2));
    }

    #[test]
    fn trace_records_selection_details() {
        let candidates = vec![
            chunk(Spec { id: "a", doc: "d1", section: "s1", tokens: 10, fusion: 0.9, order: 0 }),
            chunk(Spec { id: "b", doc: "d2", section: "s1", tokens: 20, fusion: 0.8, order: 0 }),
        ];
        let packed = packer(8000).pack("query", &candidates);
        assert_eq!(packed.trace.selected_ids, vec!["a", "b"]);
        assert_eq!(packed.trace.token_counts, vec![10, 20]);
        assert_eq!(packed.trace.scores, vec![0.9, 0.8]);
    }
}
