use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Citation, CitationMap};
use crate::search::RetrievedChunk;
use crate::utils::freshness::{Freshness, FreshnessStats};

/// Documents shorter than this carry too little substance to cite.
const MIN_CITATION_CONTENT: usize = 20;

static MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\^?(\d+)\]").unwrap());
static CANONICAL_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\^(\d+)\]").unwrap());

/// Build the citation map over the packed document set: 1-based numbers in
/// document order, deduplicated case-insensitively on source (two entries
/// survive only when the same source string maps to different documents).
pub fn build_citation_map(documents: &[RetrievedChunk]) -> CitationMap {
    let mut map = BTreeMap::new();
    let mut seen: HashMap<(String, String), u32> = HashMap::new();
    let mut next = 1u32;
    let now = Utc::now();

    for doc in documents {
        if doc.payload.content.trim().len() < MIN_CITATION_CONTENT {
            continue;
        }
        let key = (
            doc.payload.source.to_lowercase(),
            doc.payload.doc_id.clone(),
        );
        if seen.contains_key(&key) {
            continue;
        }
        seen.insert(key, next);

        let stamp = doc.payload.modified_at.unwrap_or(doc.payload.created_at);
        map.insert(
            next,
            Citation {
                id: doc.id.clone(),
                number: next,
                source: doc.payload.source.clone(),
                doc_id: doc.payload.doc_id.clone(),
                qdrant_doc_id: doc.point_id.to_string(),
                freshness: Some(Freshness::classify(stamp, now)),
                modified_at: doc.payload.modified_at,
                version: doc.payload.version.clone(),
                url: doc.payload.url.clone(),
                filepath: doc.payload.filepath.clone(),
                authors: doc.payload.authors.clone(),
            },
        );
        next += 1;
    }

    map
}

/// Which map number (if any) a document resolves to, for prompt labeling.
pub fn number_for(map: &CitationMap, doc: &RetrievedChunk) -> Option<u32> {
    map.values()
        .find(|c| {
            c.doc_id == doc.payload.doc_id
                && c.source.eq_ignore_ascii_case(&doc.payload.source)
        })
        .map(|c| c.number)
}

/// Standardize citation markers to `[^N]` and drop markers whose number is
/// not in the map, preserving adjacent punctuation. Idempotent.
pub fn format_text_with_citations(text: &str, map: &CitationMap) -> String {
    let formatted = MARKER.replace_all(text, |caps: &regex::Captures<'_>| {
        let number: u32 = caps[1].parse().unwrap_or(0);
        if map.contains_key(&number) {
            format!("[^{}]", number)
        } else {
            String::new()
        }
    });

    // Removal can leave doubled spaces or space-before-newline behind.
    let cleaned = formatted
        .replace("  ", " ")
        .replace(" \n", "\n");
    cleaned.trim_end().to_string()
}

/// Strip every citation marker (plain answer format).
pub fn strip_citations(text: &str) -> String {
    let stripped = MARKER.replace_all(text, "");
    stripped.replace("  ", " ").trim_end().to_string()
}

/// Renumber citations by first appearance in the answer. Markers are
/// rewritten to the new numbers; cited entries come first, uncited entries
/// keep their relative order after them.
pub fn renumber_by_appearance(answer: &str, map: &CitationMap) -> (String, CitationMap) {
    let mut order: Vec<u32> = Vec::new();
    for caps in CANONICAL_MARKER.captures_iter(answer) {
        if let Ok(number) = caps[1].parse::<u32>() {
            if map.contains_key(&number) && !order.contains(&number) {
                order.push(number);
            }
        }
    }

    let mut renumbering: HashMap<u32, u32> = HashMap::new();
    for (index, old) in order.iter().enumerate() {
        renumbering.insert(*old, index as u32 + 1);
    }
    let mut next = order.len() as u32 + 1;
    for old in map.keys() {
        if !renumbering.contains_key(old) {
            renumbering.insert(*old, next);
            next += 1;
        }
    }

    let rewritten = CANONICAL_MARKER.replace_all(answer, |caps: &regex::Captures<'_>| {
        let old: u32 = caps[1].parse().unwrap_or(0);
        match renumbering.get(&old) {
            Some(new) => format!("[^{}]", new),
            None => String::new(),
        }
    });

    let mut renumbered = BTreeMap::new();
    for (old, citation) in map {
        let new = renumbering[old];
        let mut citation = citation.clone();
        citation.number = new;
        renumbered.insert(new, citation);
    }

    (rewritten.into_owned(), renumbered)
}

/// Fail-closed check: every `[^N]` in the answer must resolve in the map.
pub fn validate_citations(answer: &str, map: &CitationMap) -> Result<(), Vec<u32>> {
    let mut invalid: Vec<u32> = CANONICAL_MARKER
        .captures_iter(answer)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .filter(|number| !map.contains_key(number))
        .collect();
    invalid.sort_unstable();
    invalid.dedup();

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(invalid)
    }
}

/// Numbers actually cited in the answer.
pub fn cited_numbers(answer: &str) -> HashSet<u32> {
    CANONICAL_MARKER
        .captures_iter(answer)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .collect()
}

/// Freshness distribution over the cited subset of the map.
pub fn freshness_stats(answer: &str, map: &CitationMap) -> FreshnessStats {
    let cited = cited_numbers(answer);
    let mut stats = FreshnessStats::default();
    for (number, citation) in map {
        if cited.contains(number) {
            if let Some(freshness) = citation.freshness {
                stats.add(freshness);
            }
        }
    }
    stats
}
