//! In-memory bridge liveness registry
//!
//! Shared between the stream handler (which upserts on every message) and the
//! watchdog (which flips stale bridges inactive). Records are never removed.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::alert::{AlertCause, AlertEvent};
use super::bridge::BridgeRecord;
use super::envelope::StatusReport;

/// Thread-safe table of bridges keyed by identity
#[derive(Debug, Clone, Default)]
pub struct BridgeRegistry {
    bridges: Arc<RwLock<HashMap<String, BridgeRecord>>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted message from `identity`.
    ///
    /// Returns the updated record and whether it was created by this call.
    pub async fn upsert(
        &self,
        identity: &str,
        report: &StatusReport,
        now: DateTime<Utc>,
    ) -> (BridgeRecord, bool) {
        let mut bridges = self.bridges.write().await;

        if let Some(record) = bridges.get_mut(identity) {
            record.apply(report, now);
            return (record.clone(), false);
        }

        let record = BridgeRecord::new(identity, report, now);
        bridges.insert(identity.to_string(), record.clone());
        (record, true)
    }

    /// Point-in-time copy of every record
    pub async fn snapshot(&self) -> Vec<BridgeRecord> {
        let bridges = self.bridges.read().await;
        bridges.values().cloned().collect()
    }

    pub async fn get(&self, identity: &str) -> Option<BridgeRecord> {
        let bridges = self.bridges.read().await;
        bridges.get(identity).cloned()
    }

    /// Flip every active bridge silent for longer than `window` to inactive.
    ///
    /// Check and flip happen under one write lock, so a concurrent upsert lands
    /// either wholly before or wholly after the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>, window: Duration) -> Vec<AlertEvent> {
        let mut bridges = self.bridges.write().await;

        bridges
            .values_mut()
            .filter(|record| record.active && now.signed_duration_since(record.last_seen) > window)
            .map(|record| {
                record.active = false;
                debug!(
                    "Bridge {} stale, last seen {}",
                    record.display_name(),
                    record.last_seen
                );
                AlertEvent {
                    bridge_identity: record.identity.clone(),
                    last_seen_at: record.last_seen,
                    detected_at: now,
                    cause: AlertCause::Stale,
                }
            })
            .collect()
    }

    /// Flip every active bridge to inactive regardless of age
    pub async fn mark_all_inactive(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut bridges = self.bridges.write().await;

        bridges
            .values_mut()
            .filter(|record| record.active)
            .map(|record| {
                record.active = false;
                AlertEvent {
                    bridge_identity: record.identity.clone(),
                    last_seen_at: record.last_seen,
                    detected_at: now,
                    cause: AlertCause::ConnectionLost,
                }
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        let bridges = self.bridges.read().await;
        bridges.len()
    }

    pub async fn is_empty(&self) -> bool {
        let bridges = self.bridges.read().await;
        bridges.is_empty()
    }
}
