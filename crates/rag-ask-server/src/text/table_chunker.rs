use std::sync::Arc;

use tracing::debug;

use crate::models::{Chunk, ChunkMetadata};
use crate::text::chunker::ChunkScope;
use crate::text::token_counter::TokenCounter;

/// Chunks tabular blocks row by row. Rows are atomic: a chunk boundary never
/// lands inside a row. The header (plus a markdown separator row when
/// present) stays with the first chunk and is re-emitted on continuation
/// chunks when `repeat_header` is set.
pub struct TableChunker {
    counter: Arc<TokenCounter>,
    max_tokens_per_chunk: usize,
    repeat_header: bool,
}

#[derive(Debug, Clone)]
pub struct TableChunkOutcome {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
}

impl TableChunker {
    pub fn new(counter: Arc<TokenCounter>, max_tokens_per_chunk: usize, repeat_header: bool) -> Self {
        Self {
            counter,
            max_tokens_per_chunk,
            repeat_header,
        }
    }

    pub fn chunk(&self, table: &str, scope: &ChunkScope) -> TableChunkOutcome {
        let mut warnings = Vec::new();

        if table.trim().is_empty() {
            return TableChunkOutcome {
                chunks: Vec::new(),
                warnings,
            };
        }

        // Whole table fits: emit it untouched.
        if self.counter.count(table) <= self.max_tokens_per_chunk {
            let chunk = self.build_chunk(table.to_string(), 0, table.len(), scope, 0);
            return TableChunkOutcome {
                chunks: vec![chunk],
                warnings,
            };
        }

        let lines: Vec<&str> = table.lines().collect();
        let header_rows = header_row_count(&lines);
        let header = lines[..header_rows].join("\n");

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = self.counter.count(&header);

        let header_for = |is_first: bool| -> Option<&str> {
            if is_first || self.repeat_header {
                if header.is_empty() {
                    None
                } else {
                    Some(header.as_str())
                }
            } else {
                None
            }
        };

        for row in lines[header_rows..].iter() {
            if row.trim().is_empty() {
                continue;
            }
            let row_tokens = self.counter.count(row);

            if row_tokens > self.max_tokens_per_chunk {
                warnings.push(format!(
                    "table row exceeds chunk budget ({} tokens), emitted unsplit",
                    row_tokens
                ));
            }

            if !current.is_empty() && current_tokens + row_tokens > self.max_tokens_per_chunk {
                let text = assemble(header_for(chunks.is_empty()), &current);
                let order = chunks.len();
                chunks.push(self.build_chunk(text, 0, 0, scope, order));
                current.clear();
                current_tokens = if self.repeat_header {
                    self.counter.count(&header)
                } else {
                    0
                };
            }

            current.push(row);
            current_tokens += row_tokens;
        }

        if !current.is_empty() {
            let text = assemble(header_for(chunks.is_empty()), &current);
            let order = chunks.len();
            chunks.push(self.build_chunk(text, 0, 0, scope, order));
        }

        debug!(chunks = chunks.len(), rows = lines.len(), "chunked table");

        TableChunkOutcome { chunks, warnings }
    }

    fn build_chunk(
        &self,
        text: String,
        start: usize,
        end: usize,
        scope: &ChunkScope,
        order_index: usize,
    ) -> Chunk {
        // Row regrouping breaks the tie to source offsets, so continuation
        // chunks key their id off the order index instead.
        let start_index = if end > start { start } else { order_index };
        let id = Chunk::derive_id(
            &scope.tenant,
            &scope.doc_id,
            scope.section_path.as_deref(),
            start_index,
        );
        let token_count = self.counter.count(&text);
        Chunk {
            id,
            character_count: text.chars().count(),
            token_count,
            start_index,
            end_index: if end > start { end } else { start_index },
            section_path: scope.section_path.clone(),
            text,
            metadata: ChunkMetadata {
                tenant: scope.tenant.clone(),
                doc_id: scope.doc_id.clone(),
                order_index: scope.order_base + order_index,
                is_table: true,
                is_section_header: false,
            },
        }
    }
}

/// Header detection: a markdown separator row (`|---|---|`) on the second
/// line means a two-row header block; otherwise the first line alone.
fn header_row_count(lines: &[&str]) -> usize {
    if lines.len() >= 2 && is_separator_row(lines[1]) {
        2
    } else if lines.is_empty() {
        0
    } else {
        1
    }
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '+' | '='))
        && trimmed.contains('-')
}

fn assemble(header: Option<&str>, rows: &[&str]) -> String {
    match header {
        Some(h) => format!("{}\n{}", h, rows.join("\n")),
        None => rows.join("\n"),
    }
}
