use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Chunk, ChunkMetadata};
use crate::text::token_counter::TokenCounter;

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());
static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n+").unwrap());
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStrategy {
    TokenAware,
    ParagraphAware,
    CharacterBased,
}

/// Identity of the text being chunked; feeds deterministic chunk ids and
/// chunk metadata.
#[derive(Debug, Clone)]
pub struct ChunkScope {
    pub tenant: String,
    pub doc_id: String,
    pub section_path: Option<String>,
    /// Order index assigned to the first produced chunk.
    pub order_base: usize,
    /// Document-global character position of this text. Keeps start indexes
    /// (and with them chunk ids) unique when a section spans blocks.
    pub start_base: usize,
}

impl ChunkScope {
    pub fn new(tenant: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            doc_id: doc_id.into(),
            section_path: None,
            order_base: 0,
            start_base: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub chunks: Vec<Chunk>,
    pub total_tokens: usize,
    pub strategy: ChunkStrategy,
    pub warnings: Vec<String>,
}

/// A piece of the source text before it is dressed up as a `Chunk`.
/// Offsets are byte positions into the chunked text.
#[derive(Debug, Clone)]
struct RawPiece {
    text: String,
    start: usize,
    end: usize,
}

pub struct AdaptiveChunker {
    counter: Arc<TokenCounter>,
    strategy: Option<ChunkStrategy>,
    overlap_tokens: usize,
}

impl AdaptiveChunker {
    pub fn new(
        counter: Arc<TokenCounter>,
        strategy: Option<ChunkStrategy>,
        overlap_tokens: usize,
    ) -> Self {
        Self {
            counter,
            strategy,
            overlap_tokens,
        }
    }

    pub fn counter(&self) -> &Arc<TokenCounter> {
        &self.counter
    }

    pub fn chunk(&self, text: &str, scope: &ChunkScope) -> ChunkOutcome {
        let strategy = self.strategy.unwrap_or_else(|| analyze(text));

        if text.trim().is_empty() {
            return ChunkOutcome {
                chunks: Vec::new(),
                total_tokens: 0,
                strategy,
                warnings: Vec::new(),
            };
        }

        let limit = self.counter.safe_token_limit();
        let mut warnings = Vec::new();

        let mut pieces = match strategy {
            ChunkStrategy::TokenAware => self.token_aware(text, 0, limit, &mut warnings),
            ChunkStrategy::ParagraphAware => self.paragraph_aware(text, limit, &mut warnings),
            ChunkStrategy::CharacterBased => self.character_based(text, limit),
        };

        if self.overlap_tokens > 0 {
            self.apply_overlap(&mut pieces);
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        let mut total_tokens = 0;
        for (i, piece) in pieces.into_iter().enumerate() {
            let token_count = self.counter.count(&piece.text);
            if token_count > limit {
                warnings.push(format!(
                    "chunk at offset {} exceeds safe token limit: {} > {}",
                    piece.start, token_count, limit
                ));
            }
            total_tokens += token_count;
            let start_index = scope.start_base + piece.start;
            let id = Chunk::derive_id(
                &scope.tenant,
                &scope.doc_id,
                scope.section_path.as_deref(),
                start_index,
            );
            chunks.push(Chunk {
                id,
                character_count: piece.text.chars().count(),
                token_count,
                start_index,
                end_index: scope.start_base + piece.end,
                section_path: scope.section_path.clone(),
                text: piece.text,
                metadata: ChunkMetadata {
                    tenant: scope.tenant.clone(),
                    doc_id: scope.doc_id.clone(),
                    order_index: scope.order_base + i,
                    is_table: false,
                    is_section_header: false,
                },
            });
        }

        debug!(
            chunks = chunks.len(),
            total_tokens,
            ?strategy,
            "chunked text"
        );

        ChunkOutcome {
            chunks,
            total_tokens,
            strategy,
            warnings,
        }
    }

    /// Greedy sentence accumulation. Sentences that alone exceed the budget
    /// fall back to word splitting.
    fn token_aware(
        &self,
        text: &str,
        offset: usize,
        limit: usize,
        warnings: &mut Vec<String>,
    ) -> Vec<RawPiece> {
        let sentences = split_sentences(text);
        let mut pieces: Vec<RawPiece> = Vec::new();
        let mut chunk_start: Option<usize> = None;
        let mut chunk_end = 0usize;

        let mut flush =
            |pieces: &mut Vec<RawPiece>, start: &mut Option<usize>, end: usize, text: &str| {
                if let Some(s) = start.take() {
                    let slice = text[s..end].trim_end();
                    if !slice.is_empty() {
                        pieces.push(RawPiece {
                            text: slice.to_string(),
                            start: offset + s,
                            end: offset + s + slice.len(),
                        });
                    }
                }
            };

        for (sent_start, sent_end) in sentences {
            let sentence = &text[sent_start..sent_end];
            if self.counter.count(sentence.trim_end()) > limit {
                // Oversized sentence: flush what we have, then word-split it.
                flush(&mut pieces, &mut chunk_start, chunk_end, text);
                warnings.push(format!(
                    "sentence at offset {} exceeds safe token limit, falling back to word splitting",
                    offset + sent_start
                ));
                pieces.extend(self.word_split(sentence, offset + sent_start, limit));
                continue;
            }

            match chunk_start {
                None => {
                    chunk_start = Some(sent_start);
                    chunk_end = sent_end;
                }
                Some(s) => {
                    let candidate = text[s..sent_end].trim_end();
                    if self.counter.count(candidate) <= limit {
                        chunk_end = sent_end;
                    } else {
                        flush(&mut pieces, &mut chunk_start, chunk_end, text);
                        chunk_start = Some(sent_start);
                        chunk_end = sent_end;
                    }
                }
            }
        }
        flush(&mut pieces, &mut chunk_start, chunk_end, text);

        pieces
    }

    /// Split on blank lines; paragraphs that alone exceed the budget recurse
    /// into sentence-level chunking.
    fn paragraph_aware(
        &self,
        text: &str,
        limit: usize,
        warnings: &mut Vec<String>,
    ) -> Vec<RawPiece> {
        let paragraphs = split_paragraphs(text);
        let mut pieces: Vec<RawPiece> = Vec::new();
        let mut chunk_start: Option<usize> = None;
        let mut chunk_end = 0usize;

        let mut flush =
            |pieces: &mut Vec<RawPiece>, start: &mut Option<usize>, end: usize, text: &str| {
                if let Some(s) = start.take() {
                    let slice = text[s..end].trim_end();
                    if !slice.is_empty() {
                        pieces.push(RawPiece {
                            text: slice.to_string(),
                            start: s,
                            end: s + slice.len(),
                        });
                    }
                }
            };

        for (para_start, para_end) in paragraphs {
            let paragraph = &text[para_start..para_end];
            if self.counter.count(paragraph.trim_end()) > limit {
                flush(&mut pieces, &mut chunk_start, chunk_end, text);
                pieces.extend(self.token_aware(paragraph, para_start, limit, warnings));
                continue;
            }

            match chunk_start {
                None => {
                    chunk_start = Some(para_start);
                    chunk_end = para_end;
                }
                Some(s) => {
                    let candidate = text[s..para_end].trim_end();
                    if self.counter.count(candidate) <= limit {
                        chunk_end = para_end;
                    } else {
                        flush(&mut pieces, &mut chunk_start, chunk_end, text);
                        chunk_start = Some(para_start);
                        chunk_end = para_end;
                    }
                }
            }
        }
        flush(&mut pieces, &mut chunk_start, chunk_end, text);

        pieces
    }

    /// Estimate chars-per-token from a sample, then cut fixed windows,
    /// preferring a word boundary when it lands within 80% of the target.
    fn character_based(&self, text: &str, limit: usize) -> Vec<RawPiece> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let sample_len = chars.len().min(1000);
        let sample_end = if sample_len == chars.len() {
            text.len()
        } else {
            chars[sample_len].0
        };
        let sample_tokens = self.counter.count(&text[..sample_end]).max(1);
        let chars_per_token = sample_len as f32 / sample_tokens as f32;
        let target = ((limit as f32 * chars_per_token).floor() as usize).max(1);

        let mut pieces = Vec::new();
        let mut start_char = 0usize;

        while start_char < chars.len() {
            let hard_end_char = (start_char + target).min(chars.len());

            // Look backwards for whitespace; accept if within 80% of target.
            let mut cut_char = hard_end_char;
            if hard_end_char < chars.len() {
                let floor_char = start_char + (target as f32 * 0.8) as usize;
                for i in (floor_char..hard_end_char).rev() {
                    if chars[i].1.is_whitespace() {
                        cut_char = i;
                        break;
                    }
                }
            }
            if cut_char == start_char {
                cut_char = hard_end_char;
            }

            let start_byte = chars[start_char].0;
            let end_byte = if cut_char == chars.len() {
                text.len()
            } else {
                chars[cut_char].0
            };
            let slice = text[start_byte..end_byte].trim_end();
            if !slice.is_empty() {
                pieces.push(RawPiece {
                    text: slice.to_string(),
                    start: start_byte,
                    end: start_byte + slice.len(),
                });
            }

            // Skip the whitespace we cut at.
            start_char = cut_char;
            while start_char < chars.len() && chars[start_char].1.is_whitespace() {
                start_char += 1;
            }
        }

        pieces
    }

    fn word_split(&self, text: &str, offset: usize, limit: usize) -> Vec<RawPiece> {
        let words: Vec<(usize, usize)> = WORD
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();
        let mut pieces = Vec::new();
        let mut chunk_start: Option<usize> = None;
        let mut chunk_end = 0usize;

        for (w_start, w_end) in words {
            match chunk_start {
                None => {
                    chunk_start = Some(w_start);
                    chunk_end = w_end;
                }
                Some(s) => {
                    if self.counter.count(&text[s..w_end]) <= limit {
                        chunk_end = w_end;
                    } else {
                        pieces.push(RawPiece {
                            text: text[s..chunk_end].to_string(),
                            start: offset + s,
                            end: offset + chunk_end,
                        });
                        chunk_start = Some(w_start);
                        chunk_end = w_end;
                    }
                }
            }
        }
        if let Some(s) = chunk_start {
            pieces.push(RawPiece {
                text: text[s..chunk_end].to_string(),
                start: offset + s,
                end: offset + chunk_end,
            });
        }

        pieces
    }

    /// Prepend the tail of the previous chunk to every chunk but the first.
    fn apply_overlap(&self, pieces: &mut [RawPiece]) {
        let take = ((self.overlap_tokens as f32) * 0.75).ceil() as usize;
        if take == 0 || pieces.len() < 2 {
            return;
        }

        // Collect tails first so each overlap comes from the original text of
        // the previous chunk, not an already-prefixed one.
        let tails: Vec<String> = pieces
            .iter()
            .map(|p| {
                let words: Vec<&str> = p.text.split_whitespace().collect();
                let from = words.len().saturating_sub(take);
                words[from..].join(" ")
            })
            .collect();

        for i in (1..pieces.len()).rev() {
            let tail = &tails[i - 1];
            if !tail.is_empty() {
                pieces[i].text = format!("{} {}", tail, pieces[i].text);
            }
        }
    }
}

/// Pick a strategy from the text shape: blank-line structure gets the
/// paragraph splitter, everything else the sentence splitter.
fn analyze(text: &str) -> ChunkStrategy {
    if BLANK_LINE.is_match(text) {
        ChunkStrategy::ParagraphAware
    } else {
        ChunkStrategy::TokenAware
    }
}

/// Sentence spans `(start, end)` in byte offsets. A boundary is a
/// terminator followed by whitespace and an uppercase letter; the
/// terminator stays with its sentence.
fn split_sentences(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0usize;

    for m in SENTENCE_END.find_iter(text) {
        let next_is_upper = text[m.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_uppercase());
        if next_is_upper {
            spans.push((start, m.end()));
            start = m.end();
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }

    spans
}

/// Paragraph spans `(start, end)` split on blank lines.
fn split_paragraphs(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0usize;

    for m in BLANK_LINE.find_iter(text) {
        if m.start() > start {
            spans.push((start, m.start()));
        }
        start = m.end();
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }

    spans
        .into_iter()
        .filter(|(s, e)| !text[*s..*e].trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::token_counter::{TokenizerKind, TokenizerSpec};

    fn counter(max_tokens: usize) -> Arc<TokenCounter> {
        // One token per char keeps the math in tests easy to follow.
        Arc::new(TokenCounter::new(TokenizerSpec {
            model: "test".into(),
            kind: TokenizerKind::Custom,
            max_tokens,
            safety_margin: 0.0,
            char_to_token_ratio: Some(1.0),
        }))
    }

    fn scope() -> ChunkScope {
        ChunkScope {
            section_path: Some("Intro".into()),
            ..ChunkScope::new("t", "d")
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = AdaptiveChunker::new(counter(1000), Some(ChunkStrategy::TokenAware), 0);
        let out = chunker.chunk("Just one short sentence.", &scope());
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].text, "Just one short sentence.");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn sentences_accumulate_greedily() {
        let chunker = AdaptiveChunker::new(counter(60), Some(ChunkStrategy::TokenAware), 0);
        let text = "First sentence here. Second sentence here. Third sentence here. Fourth sentence here.";
        let out = chunker.chunk(text, &scope());
        assert!(out.chunks.len() > 1);
        for c in &out.chunks {
            assert!(c.token_count <= 60, "chunk over limit: {}", c.token_count);
        }
        // Order indexes are sequential from the base
        let orders: Vec<usize> = out.chunks.iter().map(|c| c.metadata.order_index).collect();
        let expected: Vec<usize> = (0..out.chunks.len()).collect();
        assert_eq!(orders, expected);
    }

    #[test]
    fn no_sentence_boundaries_fits_as_single_chunk() {
        let chunker = AdaptiveChunker::new(counter(1000), Some(ChunkStrategy::TokenAware), 0);
        let text = "no boundaries just lowercase words flowing along";
        let out = chunker.chunk(text, &scope());
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].text, text);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn no_sentence_boundaries_oversized_word_splits_with_warning() {
        let chunker = AdaptiveChunker::new(counter(30), Some(ChunkStrategy::TokenAware), 0);
        let text = "many lowercase words that go on and on without any terminator at all";
        let out = chunker.chunk(text, &scope());
        assert!(out.chunks.len() > 1);
        assert!(!out.warnings.is_empty());
        for c in &out.chunks {
            assert!(c.token_count <= 30);
        }
    }

    #[test]
    fn paragraph_strategy_respects_blank_lines() {
        let chunker = AdaptiveChunker::new(counter(50), Some(ChunkStrategy::ParagraphAware), 0);
        let text = "Alpha paragraph content here.\n\nBeta paragraph content here.\n\nGamma paragraph content here.";
        let out = chunker.chunk(text, &scope());
        assert!(out.chunks.len() >= 2);
        for c in &out.chunks {
            assert!(c.token_count <= 50);
        }
    }

    #[test]
    fn oversized_paragraph_recurses_into_sentences() {
        let chunker = AdaptiveChunker::new(counter(60), Some(ChunkStrategy::ParagraphAware), 0);
        let big = "One full sentence right here. Another full sentence right here. Third full sentence right here.";
        let text = format!("Small lead.\n\n{}", big);
        let out = chunker.chunk(&text, &scope());
        assert!(out.chunks.len() >= 2);
        for c in &out.chunks {
            assert!(c.token_count <= 60);
        }
    }

    #[test]
    fn character_strategy_cuts_at_word_boundaries() {
        let chunker = AdaptiveChunker::new(counter(20), Some(ChunkStrategy::CharacterBased), 0);
        let text = "aaa bbb ccc ddd eee fff ggg hhh iii jjj kkk lll mmm nnn";
        let out = chunker.chunk(text, &scope());
        assert!(out.chunks.len() > 1);
        for c in &out.chunks {
            // Word-boundary cuts mean chunks never start or end mid-word
            assert!(!c.text.starts_with(' '));
            assert!(!c.text.ends_with(' '));
        }
    }

    #[test]
    fn overlap_prepends_previous_tail() {
        let chunker = AdaptiveChunker::new(counter(40), Some(ChunkStrategy::TokenAware), 8);
        let text = "First sentence with words. Second sentence with words. Third sentence with words.";
        let out = chunker.chunk(text, &scope());
        assert!(out.chunks.len() > 1);
        // ceil(8 * 0.75) = 6 words carried over
        let first_words: Vec<&str> = out.chunks[0].text.split_whitespace().collect();
        let carried = first_words[first_words.len().saturating_sub(6)..].join(" ");
        assert!(out.chunks[1].text.starts_with(&carried));
    }

    #[test]
    fn chunk_ids_are_deterministic_across_runs() {
        let chunker = AdaptiveChunker::new(counter(60), Some(ChunkStrategy::TokenAware), 0);
        let text = "First sentence here. Second sentence here. Third sentence here.";
        let a = chunker.chunk(text, &scope());
        let b = chunker.chunk(text, &scope());
        let ids_a: Vec<&str> = a.chunks.iter().map(|c| c.id.as_str()).collect();
        let ids_b: Vec<&str> = b.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn analyzer_picks_paragraphs_for_blank_lines() {
        assert_eq!(analyze("a\n\nb"), ChunkStrategy::ParagraphAware);
        assert_eq!(analyze("a. B. C."), ChunkStrategy::TokenAware);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = AdaptiveChunker::new(counter(60), None, 0);
        let out = chunker.chunk("   \n ", &scope());
        assert!(out.chunks.is_empty());
        assert_eq!(out.total_tokens, 0);
    }

    #[test]
    fn abbreviation_without_capital_does_not_split() {
        // "e.g. lowercase" has a terminator but no following capital
        let spans = split_sentences("this e.g. here stays whole");
        assert_eq!(spans.len(), 1);
    }
}
