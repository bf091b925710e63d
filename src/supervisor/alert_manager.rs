//! Alert dispatch
//!
//! Fans each [`AlertEvent`] out to every configured notifier. Delivery runs in
//! spawned tasks so a slow or failing channel never holds up the watchdog scan
//! or stream processing. Failures are logged and dropped.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{ConfigHandle, NotifyConfig};
use crate::domain::AlertEvent;
use crate::error::DeliveryError;

/// Operator channel families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierKind {
    Email,
    Sms,
    Webhook,
}

impl NotifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Webhook => "webhook",
        }
    }

    /// Channel address for this kind in the current config, if any
    pub fn channel(&self, notify: &NotifyConfig) -> Option<String> {
        let channel = match self {
            Self::Email => notify.email.as_ref(),
            Self::Sms => notify.sms.as_ref(),
            Self::Webhook => notify.webhook_url.as_ref(),
        };
        channel.filter(|c| !c.trim().is_empty()).cloned()
    }
}

impl std::fmt::Display for NotifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivers alert text to an operator channel
#[async_trait]
pub trait Notifier: Send + Sync {
    fn kind(&self) -> NotifierKind;

    async fn notify(&self, channel: &str, subject: &str, message: &str)
        -> Result<(), DeliveryError>;
}

/// Routes alert events to notifiers
#[derive(Clone)]
pub struct AlertDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    config: ConfigHandle,
    event_tx: broadcast::Sender<AlertEvent>,
}

impl AlertDispatcher {
    pub fn new(config: ConfigHandle) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            notifiers: Vec::new(),
            config,
            event_tx,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Subscribe to dispatched alerts
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.event_tx.subscribe()
    }

    /// Hand an alert to every notifier with a configured channel. Never blocks.
    pub fn dispatch(&self, event: AlertEvent) {
        let subject = event.subject();
        let message = event.message();
        warn!("{}: {}", subject, message);

        let config = self.config.current();
        for notifier in &self.notifiers {
            let kind = notifier.kind();
            let Some(channel) = kind.channel(&config.notify) else {
                debug!("No {} channel configured, skipping", kind);
                continue;
            };

            let notifier = Arc::clone(notifier);
            let subject = subject.clone();
            let message = message.clone();
            tokio::spawn(async move {
                match notifier.notify(&channel, &subject, &message).await {
                    Ok(()) => info!("Sent {} alert: {}", kind, subject),
                    Err(e) => warn!("Failed to send {} alert '{}': {}", kind, subject, e),
                }
            });
        }

        // Ignore send errors (no subscribers)
        let _ = self.event_tx.send(event);
    }
}
