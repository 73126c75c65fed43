pub mod audit;
pub mod corpus_stats;
pub mod pii;
pub mod pipeline;
pub mod sections;

pub use audit::{AuditAction, AuditEvent, AuditLog};
pub use corpus_stats::{CorpusStats, CorpusStatsRegistry};
pub use pipeline::{document_from_upload, DocOutcome, IngestPipeline, PreviewReceipt, PublishReceipt};
