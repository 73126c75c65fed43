use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::info;

use super::{build_client, LlmClient, LlmClientConfig, LlmError};

/// Per-tenant LLM client cache. A tenant without an override shares the
/// default client; configuration updates hot-swap by dropping the cached
/// entry so the next request builds against the new config.
pub struct LlmClientFactory {
    default_config: LlmClientConfig,
    overrides: RwLock<HashMap<String, LlmClientConfig>>,
    cache: DashMap<String, Arc<dyn LlmClient>>,
}

impl LlmClientFactory {
    pub fn new(default_config: LlmClientConfig) -> Self {
        Self {
            default_config,
            overrides: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
        }
    }

    pub fn client_for(&self, tenant: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
        if let Some(client) = self.cache.get(tenant) {
            return Ok(client.clone());
        }

        let config = {
            let overrides = self.overrides.read();
            overrides
                .get(tenant)
                .cloned()
                .unwrap_or_else(|| self.default_config.clone())
        };

        let client = build_client(&config)?;
        self.cache.insert(tenant.to_string(), client.clone());
        Ok(client)
    }

    /// Replace one tenant's config; the cached client is dropped so the next
    /// call rebuilds.
    pub fn update_tenant(&self, tenant: &str, config: LlmClientConfig) {
        info!(tenant, provider = %config.provider, model = %config.model, "llm config updated");
        self.overrides.write().insert(tenant.to_string(), config);
        self.cache.remove(tenant);
    }

    pub fn default_config(&self) -> &LlmClientConfig {
        &self.default_config
    }
}
