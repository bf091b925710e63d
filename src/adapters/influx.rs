//! InfluxDB (0.8 HTTP API) status recorder

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::MetricsConfig;
use crate::domain::display_name;
use crate::error::DeliveryError;
use crate::services::MetricsRecorder;

/// Posts bridge status payloads to a per-bridge series database
#[derive(Clone)]
pub struct InfluxRecorder {
    client: Client,
    config: MetricsConfig,
}

impl InfluxRecorder {
    pub fn new(config: MetricsConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, config })
    }

    /// Database for a bridge: an override keyed by full identity or bridge
    /// name, else the default
    pub fn database_for(&self, bridge_identity: &str) -> &str {
        self.config
            .databases
            .get(bridge_identity)
            .or_else(|| self.config.databases.get(display_name(bridge_identity)))
            .unwrap_or(&self.config.database)
    }

    pub fn series_url(&self, bridge_identity: &str) -> String {
        format!(
            "{}db/{}/series",
            self.config.url,
            self.database_for(bridge_identity)
        )
    }
}

#[async_trait]
impl MetricsRecorder for InfluxRecorder {
    async fn record(&self, bridge_identity: &str, payload: &Value) -> Result<(), DeliveryError> {
        let url = self.series_url(bridge_identity);
        debug!("Posting status of {} to {}", display_name(bridge_identity), url);

        let resp = self
            .client
            .post(&url)
            .query(&[
                ("u", self.config.user.as_str()),
                ("p", self.config.password.as_str()),
            ])
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::failed(
                "metrics",
                format!("POST failed, status {}", status),
            ));
        }
        Ok(())
    }
}
