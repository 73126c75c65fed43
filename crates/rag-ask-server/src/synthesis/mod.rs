pub mod citations;
pub mod events;
pub mod orchestrator;
pub mod prompt;

pub use events::{StreamEvent, SynthesisMetrics};
pub use orchestrator::{SynthesisConfig, SynthesisOrchestrator, SynthesisRequest};
