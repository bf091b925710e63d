//! Stream message handling
//!
//! Every inbound frame is decoded, applied to the registry and acknowledged in
//! one uninterrupted step. Ack sends and metrics posts never wait on I/O.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::{ConnectionHandle, StreamHandler};
use crate::config::{ConfigHandle, ConnectionLossPolicy};
use crate::domain::{decode, display_name, encode, BridgeRecord, BridgeRegistry, Envelope, Frame};
use crate::services::{MetricsRecorder, MonitorMetrics};
use crate::supervisor::AlertDispatcher;

/// Handler wiring the portal stream to the bridge registry
pub struct BridgeMonitor {
    registry: BridgeRegistry,
    connection: ConnectionHandle,
    alerts: AlertDispatcher,
    config: ConfigHandle,
    metrics: Arc<MonitorMetrics>,
    recorder: Option<Arc<dyn MetricsRecorder>>,
}

impl BridgeMonitor {
    pub fn new(
        registry: BridgeRegistry,
        connection: ConnectionHandle,
        alerts: AlertDispatcher,
        config: ConfigHandle,
        metrics: Arc<MonitorMetrics>,
    ) -> Self {
        Self {
            registry,
            connection,
            alerts,
            config,
            metrics,
            recorder: None,
        }
    }

    /// Post every status payload to a metrics store
    pub fn with_recorder(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Process one text frame received at `now`.
    ///
    /// Returns the updated record for bridge messages.
    pub async fn handle_text(&self, text: &str, now: DateTime<Utc>) -> Option<BridgeRecord> {
        self.metrics.inc_frames_received();

        let envelope = match decode(text) {
            Ok(Frame::Message(envelope)) => envelope,
            Ok(Frame::Connected) => {
                info!("Connected to portal");
                return None;
            }
            Err(e) => {
                self.metrics.inc_decode_errors();
                let preview: String = text.chars().take(100).collect();
                warn!("Dropping portal frame: {} ({})", e, preview);
                return None;
            }
        };

        let report = envelope.status();
        let (record, is_new) = self.registry.upsert(&envelope.source, &report, now).await;

        if is_new {
            info!(
                "New bridge: {}. Version: {}. Up since: {}",
                record.display_name(),
                record.version,
                record.up_since_display()
            );
        } else {
            info!(
                "Message from bridge: {}. Version: {}. Up since: {}",
                record.display_name(),
                record.version,
                record.up_since_display()
            );
        }

        self.record_metrics(&envelope);
        self.send_ack(&envelope.source);

        Some(record)
    }

    fn send_ack(&self, destination: &str) {
        let ack = Envelope::ack(&self.connection.local_identity(), destination);
        match self.connection.send(encode(&ack)) {
            Ok(()) => {
                self.metrics.inc_acks_sent();
                debug!("Sent ack to {}", display_name(destination));
            }
            Err(e) => {
                self.metrics.inc_acks_dropped();
                warn!("Ack to {} not sent: {}", display_name(destination), e);
            }
        }
    }

    fn record_metrics(&self, envelope: &Envelope) {
        let Some(recorder) = self.recorder.clone() else {
            return;
        };
        let source = envelope.source.clone();
        let payload = Value::Object(envelope.body.clone());
        tokio::spawn(async move {
            if let Err(e) = recorder.record(&source, &payload).await {
                warn!("Metrics post for {} failed: {}", display_name(&source), e);
            }
        });
    }

    /// Apply the configured connection-loss policy at `now`
    pub async fn connection_lost(&self, now: DateTime<Utc>) {
        self.metrics.inc_disconnects();

        match self.config.current().connection_loss_policy {
            ConnectionLossPolicy::Ignore => {
                debug!("Portal stream lost; bridges keep their liveness windows");
            }
            ConnectionLossPolicy::MarkInactive => {
                let fired = self.registry.mark_all_inactive(now).await;
                warn!(
                    "Portal stream lost; marked {} bridge(s) inactive",
                    fired.len()
                );
                for event in fired {
                    self.metrics.inc_alerts_raised();
                    self.alerts.dispatch(event);
                }
            }
        }
    }
}

#[async_trait]
impl StreamHandler for BridgeMonitor {
    async fn on_frame(&self, text: &str) {
        self.handle_text(text, Utc::now()).await;
    }

    async fn on_disconnect(&self) {
        self.connection_lost(Utc::now()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::portal_ws::test_handle;
    use crate::adapters::ConnectionState;
    use crate::config::test_config;
    use crate::domain::AlertCause;
    use crate::error::DeliveryError;
    use serde_json::json;
    use tokio::sync::{mpsc, watch};

    struct Fixture {
        monitor: BridgeMonitor,
        registry: BridgeRegistry,
        alerts: AlertDispatcher,
        state: watch::Sender<ConnectionState>,
        outbound: mpsc::Receiver<String>,
        config: watch::Sender<Arc<crate::config::MonitorConfig>>,
        metrics: Arc<MonitorMetrics>,
    }

    fn fixture() -> Fixture {
        let (config_tx, config) = ConfigHandle::new(test_config());
        let (connection, state, outbound) = test_handle("CID7", ConnectionState::Open);
        let registry = BridgeRegistry::new();
        let alerts = AlertDispatcher::new(config.clone());
        let metrics = Arc::new(MonitorMetrics::new());
        let monitor = BridgeMonitor::new(
            registry.clone(),
            connection,
            alerts.clone(),
            config,
            metrics.clone(),
        );
        Fixture {
            monitor,
            registry,
            alerts,
            state,
            outbound,
            config: config_tx,
            metrics,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_status_message_updates_registry_and_acks() {
        let mut fx = fixture();

        let record = fx
            .monitor
            .handle_text(
                r#"{"source":"BID11/AID2","body":{"version":"2.0","up_since":1000}}"#,
                at(0),
            )
            .await
            .unwrap();
        assert_eq!(record.identity, "BID11/AID2");
        assert_eq!(record.version, "2.0");
        assert_eq!(record.up_since, Some(1000.0));

        let ack: Value = serde_json::from_str(&fx.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(
            ack,
            json!({"source": "CID7", "destination": "BID11/AID2", "body": {"command": "none"}})
        );
        assert_eq!(fx.metrics.acks_sent(), 1);
    }

    #[tokio::test]
    async fn test_rejected_frames_leave_registry_alone() {
        let mut fx = fixture();
        fx.monitor
            .handle_text(r#"{"source":"B1","body":{"version":"1"}}"#, at(0))
            .await;
        fx.outbound.recv().await.unwrap();

        for bad in [
            "garbage",
            r#"{"source":"B1"}"#,
            r#"{"body":{"version":"9"}}"#,
            r#"{"source":"B2","body":42}"#,
        ] {
            assert!(fx.monitor.handle_text(bad, at(50)).await.is_none());
        }
        assert!(fx.monitor.handle_text(r#"{"body":"connected"}"#, at(50)).await.is_none());

        let snapshot = fx.registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].last_seen, at(0));
        assert_eq!(snapshot[0].version, "1");
        assert_eq!(fx.metrics.decode_errors(), 4);
        assert!(fx.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_registry_updated_even_when_ack_dropped() {
        let mut fx = fixture();
        fx.state.send_replace(ConnectionState::Connecting);

        let record = fx
            .monitor
            .handle_text(r#"{"source":"B1","body":{}}"#, at(5))
            .await
            .unwrap();
        assert!(record.active);
        assert_eq!(fx.registry.get("B1").await.unwrap().last_seen, at(5));
        assert!(fx.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_loss_ignored_by_default() {
        let fx = fixture();
        fx.monitor
            .handle_text(r#"{"source":"B1","body":{}}"#, at(0))
            .await;

        fx.monitor.connection_lost(at(1)).await;
        assert!(fx.registry.get("B1").await.unwrap().active);
    }

    #[tokio::test]
    async fn test_connection_loss_can_mark_bridges_inactive() {
        let fx = fixture();
        let mut config = test_config();
        config.connection_loss_policy = ConnectionLossPolicy::MarkInactive;
        fx.config.send_replace(Arc::new(config));
        let mut events = fx.alerts.subscribe();

        fx.monitor
            .handle_text(r#"{"source":"B1","body":{}}"#, at(0))
            .await;
        fx.monitor.connection_lost(at(1)).await;

        assert!(!fx.registry.get("B1").await.unwrap().active);
        let event = events.recv().await.unwrap();
        assert_eq!(event.cause, AlertCause::ConnectionLost);
        assert_eq!(event.last_seen_at, at(0));
    }

    struct FailingRecorder(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl MetricsRecorder for FailingRecorder {
        async fn record(&self, bridge: &str, _payload: &Value) -> Result<(), DeliveryError> {
            let _ = self.0.send(bridge.to_string());
            Err(DeliveryError::failed("metrics", "store unavailable"))
        }
    }

    #[tokio::test]
    async fn test_metrics_failure_does_not_affect_handling() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = fx.monitor.with_recorder(Arc::new(FailingRecorder(tx)));

        let record = monitor
            .handle_text(r#"{"source":"B9","body":{"temp":21}}"#, at(0))
            .await;
        assert!(record.is_some());
        assert_eq!(rx.recv().await.unwrap(), "B9");
    }
}
