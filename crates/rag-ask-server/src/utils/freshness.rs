use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Age classification of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    /// Modified within the last 7 days.
    Fresh,
    /// Modified within the last 30 days.
    Recent,
    /// Older than 30 days.
    Stale,
}

impl Freshness {
    pub fn classify(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = now.signed_duration_since(timestamp);
        if age.num_days() <= 7 {
            Freshness::Fresh
        } else if age.num_days() <= 30 {
            Freshness::Recent
        } else {
            Freshness::Stale
        }
    }
}

/// Aggregate freshness counts over a set of cited sources, emitted in the
/// stream `metadata` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreshnessStats {
    pub fresh: usize,
    pub recent: usize,
    pub stale: usize,
}

impl FreshnessStats {
    pub fn add(&mut self, freshness: Freshness) {
        match freshness {
            Freshness::Fresh => self.fresh += 1,
            Freshness::Recent => self.recent += 1,
            Freshness::Stale => self.stale += 1,
        }
    }
}
