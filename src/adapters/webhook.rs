//! Chat bot webhook notifications
//!
//! Posts alert text to a Feishu (Lark) style bot webhook.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::DeliveryError;
use crate::supervisor::{Notifier, NotifierKind};

/// Webhook notification client
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    msg_type: &'static str,
    content: WebhookContent<'a>,
}

#[derive(Serialize)]
struct WebhookContent<'a> {
    text: &'a str,
}

impl WebhookNotifier {
    pub fn new() -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client })
    }

    /// Send a text message to the webhook at `url`
    pub async fn send_message(&self, url: &str, text: &str) -> Result<(), DeliveryError> {
        let message = WebhookMessage {
            msg_type: "text",
            content: WebhookContent { text },
        };

        let resp = self.client.post(url).json(&message).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::failed(
                "webhook",
                format!("HTTP {}: {}", status, body),
            ));
        }

        debug!("Webhook notification sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn kind(&self) -> NotifierKind {
        NotifierKind::Webhook
    }

    async fn notify(&self, channel: &str, subject: &str, message: &str) -> Result<(), DeliveryError> {
        let text = format!("{}\n{}", subject, message);
        self.send_message(channel, &text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_http::{one_shot_server, OK_JSON};

    #[tokio::test]
    async fn test_posts_text_message() {
        let (base, server) = one_shot_server(OK_JSON).await;
        let notifier = WebhookNotifier::new().unwrap();

        notifier
            .notify(
                &format!("{}/open-apis/bot/v2/hook/abc", base),
                "Alert for Bridge BID11",
                "Not heard from bridge BID11",
            )
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /open-apis/bot/v2/hook/abc"));
        assert!(request.contains(
            r#"{"msg_type":"text","content":{"text":"Alert for Bridge BID11\nNot heard from bridge BID11"}}"#
        ));
    }

    #[tokio::test]
    async fn test_error_status_is_delivery_failure() {
        let (base, _server) = one_shot_server(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\noops",
        )
        .await;
        let notifier = WebhookNotifier::new().unwrap();

        let err = notifier.send_message(&base, "hi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Failed { ref channel, .. } if channel == "webhook"));
    }
}
