use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Statistics age out after a day; stale files are treated as absent and
/// rebuilt incrementally from subsequent publishes.
const STATS_TTL_HOURS: i64 = 24;
/// Cap on persisted pmi pairs to keep the JSON bounded.
const MAX_PMI_PAIRS: usize = 2048;

/// Per-tenant corpus statistics, recomputed incrementally at publish time
/// and consumed by the lexical scorer at query time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusStats {
    pub total_docs: u64,
    pub total_tokens: u64,
    /// Document frequency per core token.
    #[serde(default)]
    pub df: HashMap<String, u64>,
    /// Inverse document frequency, derived from `df` on every persist.
    #[serde(default)]
    pub idf: HashMap<String, f64>,
    /// Co-occurrence counts for adjacent core-token pairs ("a b").
    #[serde(default)]
    pub cooc: HashMap<String, u64>,
    /// Pointwise mutual information for the co-occurring pairs.
    #[serde(default)]
    pub pmi: HashMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

impl CorpusStats {
    pub fn idf_for(&self, token: &str) -> f64 {
        self.idf.get(token).copied().unwrap_or_else(|| {
            // Unseen token: as informative as a singleton.
            (((1 + self.total_docs) as f64) / 2.0).ln() + 1.0
        })
    }

    fn observe_document(&mut self, core_tokens: &[String], token_count: usize) {
        self.total_docs += 1;
        self.total_tokens += token_count as u64;

        let mut seen = std::collections::HashSet::new();
        for token in core_tokens {
            if seen.insert(token.as_str()) {
                *self.df.entry(token.clone()).or_insert(0) += 1;
            }
        }
        for pair in core_tokens.windows(2) {
            *self
                .cooc
                .entry(format!("{} {}", pair[0], pair[1]))
                .or_insert(0) += 1;
        }
    }

    fn recompute_derived(&mut self) {
        let docs = self.total_docs.max(1) as f64;

        self.idf = self
            .df
            .iter()
            .map(|(token, df)| {
                let idf = ((1.0 + docs) / (1.0 + *df as f64)).ln() + 1.0;
                (token.clone(), idf)
            })
            .collect();

        let total_pairs: u64 = self.cooc.values().sum();
        if total_pairs == 0 {
            self.pmi.clear();
            return;
        }

        let mut pairs: Vec<(&String, &u64)> = self.cooc.iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        self.pmi = pairs
            .into_iter()
            .take(MAX_PMI_PAIRS)
            .filter_map(|(pair, count)| {
                let (a, b) = pair.split_once(' ')?;
                let p_ab = *count as f64 / total_pairs as f64;
                let p_a = *self.df.get(a)? as f64 / docs;
                let p_b = *self.df.get(b)? as f64 / docs;
                if p_a <= 0.0 || p_b <= 0.0 {
                    return None;
                }
                Some((pair.clone(), (p_ab / (p_a * p_b)).ln()))
            })
            .collect();
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.updated_at) > Duration::hours(STATS_TTL_HOURS)
    }
}

/// Disk-backed registry of per-tenant statistics. Reads are served from an
/// in-memory copy-on-write map; writers persist JSON per tenant.
pub struct CorpusStatsRegistry {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<CorpusStats>>>,
}

impl CorpusStatsRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, tenant: &str) -> PathBuf {
        // Tenant ids may contain path-hostile characters; hex keeps the
        // filename safe.
        self.dir
            .join(format!("corpus-{}.json", hex::encode(tenant.as_bytes())))
    }

    /// Current stats for a tenant, loading from disk on first access.
    /// Expired stats are treated as absent.
    pub async fn get(&self, tenant: &str) -> Option<Arc<CorpusStats>> {
        let now = Utc::now();

        {
            let cache = self.cache.read().await;
            if let Some(stats) = cache.get(tenant) {
                if !stats.is_stale(now) {
                    return Some(stats.clone());
                }
                return None;
            }
        }

        let loaded = self.load(tenant).await?;
        if loaded.is_stale(now) {
            debug!(tenant, "corpus stats expired");
            return None;
        }
        let loaded = Arc::new(loaded);
        self.cache
            .write()
            .await
            .insert(tenant.to_string(), loaded.clone());
        Some(loaded)
    }

    /// Fold one published document into the tenant's statistics and persist.
    pub async fn observe_publish(
        &self,
        tenant: &str,
        core_tokens: &[String],
        token_count: usize,
    ) {
        let mut stats = match self.get(tenant).await {
            Some(existing) => (*existing).clone(),
            None => CorpusStats::default(),
        };

        stats.observe_document(core_tokens, token_count);
        stats.updated_at = Utc::now();
        stats.recompute_derived();

        if let Err(e) = self.persist(tenant, &stats).await {
            warn!(tenant, error = %e, "failed to persist corpus stats");
        }

        self.cache
            .write()
            .await
            .insert(tenant.to_string(), Arc::new(stats));
    }

    async fn load(&self, tenant: &str) -> Option<CorpusStats> {
        let path = self.path_for(tenant);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(tenant, error = %e, "corrupt corpus stats file, ignoring");
                None
            }
        }
    }

    async fn persist(&self, tenant: &str, stats: &CorpusStats) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(tenant);
        let json = serde_json::to_vec_pretty(stats)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn rare_tokens_have_higher_idf() {
        let mut stats = CorpusStats::default();
        for _ in 0..10 {
            stats.observe_document(&tokens(&["common", "filler"]), 10);
        }
        stats.observe_document(&tokens(&["common", "unicorn"]), 10);
        stats.recompute_derived();

        assert!(stats.idf_for("unicorn") > stats.idf_for("common"));
    }

    #[test]
    fn unseen_token_gets_singleton_idf() {
        let mut stats = CorpusStats::default();
        stats.observe_document(&tokens(&["alpha"]), 5);
        stats.recompute_derived();
        assert!(stats.idf_for("never-seen") > 0.0);
    }

    #[test]
    fn cooc_counts_adjacent_pairs() {
        let mut stats = CorpusStats::default();
        stats.observe_document(&tokens(&["alpha", "beta", "gamma"]), 3);
        stats.observe_document(&tokens(&["alpha", "beta"]), 2);
        assert_eq!(stats.cooc.get("alpha beta"), Some(&2));
        assert_eq!(stats.cooc.get("beta gamma"), Some(&1));
    }

    #[test]
    fn staleness_follows_ttl() {
        let mut stats = CorpusStats::default();
        stats.updated_at = Utc::now();
        assert!(!stats.is_stale(Utc::now()));
        assert!(stats.is_stale(Utc::now() + Duration::hours(25)));
    }

    #[tokio::test]
    async fn registry_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CorpusStatsRegistry::new(dir.path());

        registry
            .observe_publish("acme", &tokens(&["refund", "policy"]), 20)
            .await;
        registry
            .observe_publish("acme", &tokens(&["refund", "window"]), 15)
            .await;

        let stats = registry.get("acme").await.unwrap();
        assert_eq!(stats.total_docs, 2);
        assert_eq!(stats.total_tokens, 35);
        assert_eq!(stats.df.get("refund"), Some(&2));

        // Fresh registry re-reads from disk
        let reloaded = CorpusStatsRegistry::new(dir.path());
        let stats = reloaded.get("acme").await.unwrap();
        assert_eq!(stats.total_docs, 2);
    }

    #[tokio::test]
    async fn registry_isolates_tenants() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CorpusStatsRegistry::new(dir.path());

        registry.observe_publish("acme", &tokens(&["alpha"]), 1).await;
        assert!(registry.get("other").await.is_none());
    }
}
