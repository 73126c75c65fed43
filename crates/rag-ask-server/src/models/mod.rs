pub mod ask;
pub mod chunk;
pub mod citation;
pub mod document;
pub mod guardrail;
pub mod user;

pub use ask::{AnswerFormat, AnswerResponse, AskOutcome, AskRequest};
pub use chunk::{Chunk, ChunkMetadata};
pub use citation::{Citation, CitationMap};
pub use document::{Block, BlockType, DocMeta, NormalizedDoc};
pub use guardrail::{AlgorithmScores, GuardrailDecision, IdkResponse, ReasonCode, ScoreStats};
pub use user::UserContext;
