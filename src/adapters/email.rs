//! E-mail alerts over SMTP with STARTTLS

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::config::SmtpConfig;
use crate::error::DeliveryError;
use crate::supervisor::{Notifier, NotifierKind};

/// SMTP notifier
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| DeliveryError::failed("email", format!("bad sender address: {}", e)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| DeliveryError::failed("email", e))?
            .port(config.port)
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport, from })
    }

    /// Build a plain + html alternative message to comma-separated recipients
    pub fn build_message(
        from: &Mailbox,
        recipients: &str,
        subject: &str,
        body: &str,
    ) -> Result<Message, DeliveryError> {
        let mut builder = Message::builder().from(from.clone()).subject(subject);

        let mut any = false;
        for recipient in recipients.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let to: Mailbox = recipient.parse().map_err(|e| {
                DeliveryError::failed("email", format!("bad recipient {}: {}", recipient, e))
            })?;
            builder = builder.to(to);
            any = true;
        }
        if !any {
            return Err(DeliveryError::failed("email", "no recipients"));
        }

        let text = format!("{} \n", body);
        let html = format!("<p>{}</p>", html_escape(body));
        builder
            .multipart(MultiPart::alternative_plain_html(text, html))
            .map_err(|e| DeliveryError::failed("email", e))
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn kind(&self) -> NotifierKind {
        NotifierKind::Email
    }

    async fn notify(&self, channel: &str, subject: &str, message: &str) -> Result<(), DeliveryError> {
        let email = Self::build_message(&self.from, channel, subject, message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| DeliveryError::failed("email", e))?;
        debug!("Sent mail to {}", channel);
        Ok(())
    }
}
