//! SMS alerts through the Twilio REST API

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TwilioConfig;
use crate::error::DeliveryError;
use crate::supervisor::{Notifier, NotifierKind};

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

/// Twilio SMS notifier
#[derive(Clone)]
pub struct SmsNotifier {
    client: Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl SmsNotifier {
    pub fn new(config: &TwilioConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            api_base: TWILIO_API.to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        })
    }

    /// Point at a different API root
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
    }

    async fn send_one(&self, to: &str, body: &str) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", body)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::failed("sms", format!("HTTP {}: {}", status, text)));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    fn kind(&self) -> NotifierKind {
        NotifierKind::Sms
    }

    /// One message per comma-separated number. Every number is attempted.
    async fn notify(&self, channel: &str, _subject: &str, message: &str) -> Result<(), DeliveryError> {
        let mut failed = Vec::new();

        for number in channel.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match self.send_one(number, message).await {
                Ok(()) => debug!("Sent sms to {}", number),
                Err(e) => {
                    warn!("Unable to send sms to {}: {}", number, e);
                    failed.push(number.to_string());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError::failed(
                "sms",
                format!("no delivery to {}", failed.join(", ")),
            ))
        }
    }
}
