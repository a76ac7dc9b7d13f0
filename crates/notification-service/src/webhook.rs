use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::{NotificationChannel, NotificationError, NotificationMessage};

/// Posts notifications to a Discord-compatible webhook.
pub struct DiscordWebhookChannel {
    webhook_url: String,
    client: Client,
}

impl DiscordWebhookChannel {
    /// `timeout` bounds each outbound call, connection setup included.
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            webhook_url: webhook_url.into(),
            client,
        })
    }
}

#[async_trait]
impl NotificationChannel for DiscordWebhookChannel {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&message.webhook_payload())
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        tracing::debug!("Webhook accepted notification for {} ({})", message.submission_id, status);
        Ok(())
    }

    fn name(&self) -> &str {
        "discord-webhook"
    }
}
