pub mod config;
pub mod engine;
pub mod suggestions;

pub use config::{GuardrailConfigMap, TenantGuardrailConfig, DEFAULT_TENANT_KEY};
pub use engine::GuardrailEngine;
