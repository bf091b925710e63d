use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DeliveryError;

/// Sink for per-bridge status payloads
#[async_trait]
pub trait MetricsRecorder: Send + Sync {
    async fn record(&self, bridge_identity: &str, payload: &Value) -> Result<(), DeliveryError>;
}

/// Process counters for observability
#[derive(Debug, Default)]
pub struct MonitorMetrics {
    /// Text frames handed to the handler
    frames_received: AtomicU64,
    /// Frames dropped as undecodable
    decode_errors: AtomicU64,
    /// Acks queued on the stream
    acks_sent: AtomicU64,
    /// Acks dropped (stream not open or queue full)
    acks_dropped: AtomicU64,
    /// Active→inactive transitions
    alerts_raised: AtomicU64,
    /// Open streams lost
    disconnects: AtomicU64,
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decode_errors(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_acks_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_acks_dropped(&self) {
        self.acks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alerts_raised(&self) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_disconnects(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn acks_sent(&self) -> u64 {
        self.acks_sent.load(Ordering::Relaxed)
    }

    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised.load(Ordering::Relaxed)
    }

    /// One-line summary for periodic and shutdown logs
    pub fn summary(&self) -> String {
        format!(
            "frames={} decode_errors={} acks={} acks_dropped={} alerts={} disconnects={}",
            self.frames_received.load(Ordering::Relaxed),
            self.decode_errors.load(Ordering::Relaxed),
            self.acks_sent.load(Ordering::Relaxed),
            self.acks_dropped.load(Ordering::Relaxed),
            self.alerts_raised.load(Ordering::Relaxed),
            self.disconnects.load(Ordering::Relaxed),
        )
    }
}
