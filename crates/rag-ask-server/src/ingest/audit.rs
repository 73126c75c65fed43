use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

const RING_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Published,
    Tombstoned,
    PreviewServed,
    UploadReceived,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub tenant: String,
    pub doc_id: String,
    pub action: AuditAction,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Bounded in-memory audit trail. Every event also lands in the structured
/// log; the ring exists for operational spot checks.
#[derive(Default)]
pub struct AuditLog {
    ring: Mutex<VecDeque<AuditEvent>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        tenant: &str,
        doc_id: &str,
        action: AuditAction,
        chunks: usize,
        detail: Option<String>,
    ) {
        info!(
            tenant,
            doc_id,
            ?action,
            chunks,
            detail = detail.as_deref().unwrap_or(""),
            "ingest audit"
        );

        let mut ring = self.ring.lock();
        if ring.len() >= RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(AuditEvent {
            timestamp: Utc::now(),
            tenant: tenant.to_string(),
            doc_id: doc_id.to_string(),
            action,
            chunks,
            detail,
        });
    }

    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let ring = self.ring.lock();
        ring.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_returns_most_recent_first() {
        let log = AuditLog::new();
        log.record("t", "d1", AuditAction::Published, 4, None);
        log.record("t", "d2", AuditAction::Tombstoned, 0, Some("cascade".into()));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].doc_id, "d2");
        assert_eq!(recent[0].action, AuditAction::Tombstoned);
    }

    #[test]
    fn ring_is_bounded() {
        let log = AuditLog::new();
        for i in 0..(RING_CAPACITY + 10) {
            log.record("t", &format!("d{}", i), AuditAction::Published, 1, None);
        }
        assert_eq!(log.recent(usize::MAX).len(), RING_CAPACITY);
    }
}
