use chrono::{DateTime, Utc};
use serde::Serialize;

use super::bridge::{display_name, nice_time};

/// Why a bridge was flipped inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertCause {
    /// No message within the liveness window
    Stale,
    /// Portal stream dropped while the bridge was active
    ConnectionLost,
}

/// One active→inactive transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub bridge_identity: String,
    pub last_seen_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub cause: AlertCause,
}

impl AlertEvent {
    pub fn display_name(&self) -> &str {
        display_name(&self.bridge_identity)
    }

    pub fn subject(&self) -> String {
        format!("Alert for Bridge {}", self.display_name())
    }

    pub fn message(&self) -> String {
        match self.cause {
            AlertCause::Stale => format!(
                "Not heard from bridge {} since {}",
                self.display_name(),
                nice_time(self.last_seen_at)
            ),
            AlertCause::ConnectionLost => format!(
                "Lost portal connection at {}; bridge {} last heard from {}",
                nice_time(self.detected_at),
                self.display_name(),
                nice_time(self.last_seen_at)
            ),
        }
    }
}
