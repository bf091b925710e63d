pub mod bridge_monitor;
pub mod metrics;

pub use bridge_monitor::BridgeMonitor;
pub use metrics::{MetricsRecorder, MonitorMetrics};
