use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;

use super::envelope::StatusReport;

/// Version shown for bridges that never reported one
pub const UNKNOWN_VERSION: &str = "unknown";

/// Liveness state of one bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeRecord {
    /// Identity as it appears in `source`, e.g. `BID11/AID2`
    pub identity: String,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
    pub version: String,
    /// Boot time the bridge reports, epoch seconds
    pub up_since: Option<f64>,
}

impl BridgeRecord {
    pub(crate) fn new(identity: &str, report: &StatusReport, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            identity: identity.to_string(),
            last_seen: now,
            active: true,
            version: UNKNOWN_VERSION.to_string(),
            up_since: None,
        };
        record.apply(report, now);
        record
    }

    /// Refresh from an accepted message
    pub(crate) fn apply(&mut self, report: &StatusReport, now: DateTime<Utc>) {
        self.active = true;
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.version = report
            .version
            .clone()
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        self.up_since = report.up_since;
    }

    pub fn display_name(&self) -> &str {
        display_name(&self.identity)
    }

    /// Reported boot time for log lines
    pub fn up_since_display(&self) -> String {
        match self.up_since {
            Some(secs) => Utc
                .timestamp_millis_opt((secs * 1000.0) as i64)
                .single()
                .map(nice_time)
                .unwrap_or_else(|| format!("{secs}")),
            None => "not reported".to_string(),
        }
    }
}

/// Bridge identities may carry a `/`-separated suffix that is not shown to operators
pub fn display_name(identity: &str) -> &str {
    identity.split('/').next().unwrap_or(identity)
}

/// Local wall-clock rendering used in operator messages
pub fn nice_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%H:%M:%S, %d-%m-%Y")
        .to_string()
}
