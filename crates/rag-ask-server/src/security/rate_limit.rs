use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::{ApiError, LimitScope};

/// Probability of sweeping expired windows on any single check.
const SWEEP_PROBABILITY: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_ip: u32,
    pub per_user: u32,
    pub per_tenant: u32,
    pub window_minutes: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_ip: 30,
            per_user: 60,
            per_tenant: 600,
            window_minutes: 1,
        }
    }
}

/// Sliding-window counters for the ip/user/tenant scopes. Windows live in
/// one map keyed `scope:identity`; expired entries are reaped lazily plus a
/// 1% probabilistic full sweep.
pub struct RateLimiters {
    config: RateLimitConfig,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiters {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn check_ip(&self, ip: &str) -> Result<(), ApiError> {
        self.check(LimitScope::Ip, ip, self.config.per_ip)
    }

    pub fn check_user(&self, user: &str) -> Result<(), ApiError> {
        self.check(LimitScope::User, user, self.config.per_user)
    }

    pub fn check_tenant(&self, tenant: &str) -> Result<(), ApiError> {
        self.check(LimitScope::Tenant, tenant, self.config.per_tenant)
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_minutes.max(1) * 60)
    }

    fn check(&self, scope: LimitScope, identity: &str, limit: u32) -> Result<(), ApiError> {
        if limit == 0 {
            return Ok(());
        }

        let window = self.window();
        let now = Instant::now();
        let key = format!("{}:{}", scope, identity);

        let mut entry = self.windows.entry(key).or_default();
        while entry
            .front()
            .is_some_and(|stamp| now.duration_since(*stamp) >= window)
        {
            entry.pop_front();
        }

        if entry.len() >= limit as usize {
            let oldest = entry.front().copied().unwrap_or(now);
            let retry_after = window
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            drop(entry);
            debug!(%scope, identity, retry_after, "rate limit exceeded");
            return Err(ApiError::RateLimited { scope, retry_after });
        }

        entry.push_back(now);
        drop(entry);

        if rand::random::<f64>() < SWEEP_PROBABILITY {
            self.sweep(now, window);
        }

        Ok(())
    }

    fn sweep(&self, now: Instant, window: Duration) {
        let before = self.windows.len();
        self.windows.retain(|_, stamps| {
            stamps
                .back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });
        debug!(
            removed = before.saturating_sub(self.windows.len()),
            "swept rate limit windows"
        );
    }
}
