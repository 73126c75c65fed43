pub mod ingest_token;
pub mod middleware;
pub mod rate_limit;

pub use ingest_token::IngestTokenGuard;
pub use rate_limit::{RateLimitConfig, RateLimiters};
