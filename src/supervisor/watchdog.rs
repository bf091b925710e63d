//! Bridge liveness watchdog
//!
//! Scans the registry on the configured period, flips bridges that have been silent
//! longer than the liveness window to inactive and raises one alert per flip.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::alert_manager::AlertDispatcher;
use crate::config::{ConfigHandle, MAX_CHECK_INTERVAL_SECS};
use crate::coordination::ShutdownToken;
use crate::domain::{AlertEvent, BridgeRegistry};
use crate::services::MonitorMetrics;

/// Periodic staleness scanner
pub struct Watchdog {
    registry: BridgeRegistry,
    config: ConfigHandle,
    alerts: AlertDispatcher,
    metrics: Arc<MonitorMetrics>,
}

impl Watchdog {
    pub fn new(
        registry: BridgeRegistry,
        config: ConfigHandle,
        alerts: AlertDispatcher,
        metrics: Arc<MonitorMetrics>,
    ) -> Self {
        Self {
            registry,
            config,
            alerts,
            metrics,
        }
    }

    /// Run one scan at `now` and dispatch an alert for every transition
    pub async fn scan(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let settings = self.config.current().watchdog.clone();
        let Some(window) = settings.liveness_window() else {
            warn!(
                "Skipping scan: liveness window of {}s is out of range",
                settings.liveness_window_secs
            );
            return Vec::new();
        };
        let fired = self.registry.sweep(now, window).await;

        for event in &fired {
            self.metrics.inc_alerts_raised();
            self.alerts.dispatch(event.clone());
        }

        if !fired.is_empty() {
            debug!("Watchdog scan flipped {} bridge(s) inactive", fired.len());
        }
        fired
    }

    /// Delay before the next scan, from the current config snapshot
    pub fn period(&self) -> Duration {
        self.config
            .current()
            .watchdog
            .check_interval()
            .clamp(Duration::from_secs(1), Duration::from_secs(MAX_CHECK_INTERVAL_SECS))
    }

    /// Scan until shutdown, re-reading the period after every scan
    pub async fn run(self, mut shutdown: ShutdownToken) {
        let mut period = self.period();
        info!("Watchdog started (period {:?})", period);

        loop {
            self.scan(Utc::now()).await;

            let next = self.period();
            if next != period {
                info!("Watchdog period changed from {:?} to {:?}", period, next);
                period = next;
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.cancelled() => {
                    info!("Watchdog stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::coordination::{Shutdown, ShutdownSignal};
    use crate::domain::StatusReport;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn watchdog(window_secs: u64) -> (Watchdog, BridgeRegistry, AlertDispatcher) {
        let mut config = test_config();
        config.watchdog.liveness_window_secs = window_secs;
        config.watchdog.check_interval_secs = 1;
        let (_tx, handle) = ConfigHandle::new(config);

        let registry = BridgeRegistry::new();
        let alerts = AlertDispatcher::new(handle.clone());
        let dog = Watchdog::new(
            registry.clone(),
            handle,
            alerts.clone(),
            Arc::new(MonitorMetrics::new()),
        );
        (dog, registry, alerts)
    }

    #[tokio::test]
    async fn test_stale_bridge_raises_one_alert() {
        let (dog, registry, alerts) = watchdog(100);
        let mut events = alerts.subscribe();

        let report = StatusReport {
            version: Some("2.0".to_string()),
            up_since: Some(1000.0),
        };
        registry.upsert("B1", &report, at(0)).await;

        let record = registry.get("B1").await.unwrap();
        assert!(record.active);
        assert_eq!(record.version, "2.0");
        assert_eq!(record.up_since, Some(1000.0));

        assert!(dog.scan(at(100)).await.is_empty());

        let fired = dog.scan(at(150)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].last_seen_at, at(0));
        assert_eq!(fired[0].detected_at, at(150));
        assert!(!registry.get("B1").await.unwrap().active);
        assert_eq!(events.recv().await.unwrap().bridge_identity, "B1");

        assert!(dog.scan(at(300)).await.is_empty());
        assert_eq!(dog.metrics.alerts_raised(), 1);
    }

    #[tokio::test]
    async fn test_window_follows_config_reload() {
        let mut config = test_config();
        config.watchdog.liveness_window_secs = 100;
        let (tx, handle) = ConfigHandle::new(config.clone());
        let registry = BridgeRegistry::new();
        let dog = Watchdog::new(
            registry.clone(),
            handle.clone(),
            AlertDispatcher::new(handle),
            Arc::new(MonitorMetrics::new()),
        );

        registry.upsert("B1", &StatusReport::default(), at(0)).await;
        assert!(dog.scan(at(150)).await.len() == 1);

        registry.upsert("B1", &StatusReport::default(), at(200)).await;
        config.watchdog.liveness_window_secs = 1000;
        tx.send_replace(Arc::new(config));
        assert!(dog.scan(at(350)).await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_window_skips_scan() {
        let (dog, registry, _alerts) = watchdog(10_000_000_000_000_000);
        registry.upsert("B1", &StatusReport::default(), at(0)).await;

        assert!(dog.scan(at(1_000_000)).await.is_empty());
        assert!(registry.get("B1").await.unwrap().active);
    }

    #[tokio::test]
    async fn test_period_follows_config_reload() {
        let mut config = test_config();
        config.watchdog.check_interval_secs = 30;
        let (tx, handle) = ConfigHandle::new(config.clone());
        let dog = Watchdog::new(
            BridgeRegistry::new(),
            handle.clone(),
            AlertDispatcher::new(handle),
            Arc::new(MonitorMetrics::new()),
        );
        assert_eq!(dog.period(), Duration::from_secs(30));

        config.watchdog.check_interval_secs = 5;
        tx.send_replace(Arc::new(config));
        assert_eq!(dog.period(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (dog, _registry, _alerts) = watchdog(100);
        let shutdown = Shutdown::new();
        let task = tokio::spawn(dog.run(shutdown.token()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
