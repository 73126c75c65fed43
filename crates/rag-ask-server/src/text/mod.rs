pub mod chunker;
pub mod guard;
pub mod table_chunker;
pub mod token_counter;

pub use chunker::{AdaptiveChunker, ChunkOutcome, ChunkScope, ChunkStrategy};
pub use guard::{GuardReport, IngestionGuard, RejectReason, RejectedChunk};
pub use table_chunker::TableChunker;
pub use token_counter::{TokenCount, TokenCounter, TokenizerKind, TokenizerSpec};
