use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_TENANT_KEY: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantGuardrailConfig {
    pub enabled: bool,
    pub min_confidence: f32,
    pub min_top_score: f32,
    pub min_mean_score: f32,
    pub min_result_count: usize,
}

impl Default for TenantGuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.6,
            min_top_score: 0.5,
            min_mean_score: 0.4,
            min_result_count: 2,
        }
    }
}

/// Read-mostly tenant configuration map. Readers clone an `Arc` snapshot;
/// updates build a fresh map and swap it in whole, so a reader never sees a
/// partially-applied update.
pub struct GuardrailConfigMap {
    inner: RwLock<Arc<HashMap<String, TenantGuardrailConfig>>>,
}

impl GuardrailConfigMap {
    pub fn new(mut configs: HashMap<String, TenantGuardrailConfig>) -> Self {
        configs
            .entry(DEFAULT_TENANT_KEY.to_string())
            .or_default();
        Self {
            inner: RwLock::new(Arc::new(configs)),
        }
    }

    pub fn for_tenant(&self, tenant: &str) -> TenantGuardrailConfig {
        let snapshot = self.inner.read().clone();
        snapshot
            .get(tenant)
            .or_else(|| snapshot.get(DEFAULT_TENANT_KEY))
            .cloned()
            .unwrap_or_default()
    }

    /// Atomic replace of the whole map.
    pub fn replace(&self, mut configs: HashMap<String, TenantGuardrailConfig>) {
        configs
            .entry(DEFAULT_TENANT_KEY.to_string())
            .or_default();
        info!(tenants = configs.len(), "guardrail config replaced");
        *self.inner.write() = Arc::new(configs);
    }
}

impl Default for GuardrailConfigMap {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}
