use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::{Notification, NotificationSender, SenderError, ensure_success};
use crate::database::models::NotificationChannel;

/// A sender for pushing notifications to a user-supplied webhook as JSON.
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Webhook
    }

    async fn send(&self, destination: &str, notification: &Notification) -> Result<(), SenderError> {
        let url = Url::parse(destination)
            .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid webhook URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SenderError::InvalidConfiguration(format!(
                "Unsupported webhook scheme: {}",
                url.scheme()
            )));
        }

        let response = self.client.post(url).json(notification).send().await?;
        ensure_success(response, "Webhook").await
    }
}
