use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{Notification, NotificationSender, SenderError, ensure_success};
use crate::database::models::NotificationChannel;

/// A sender for pushing notifications via the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    bot_token: String,
    api_base: String,
}

impl TelegramSender {
    pub fn new(client: Client, bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client,
            bot_token: bot_token.into(),
            api_base: api_base.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.bot_token
        )
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Telegram
    }

    async fn send(&self, destination: &str, notification: &Notification) -> Result<(), SenderError> {
        if self.bot_token.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Telegram bot token is empty".to_string(),
            ));
        }

        let payload = TelegramMessage {
            chat_id: destination,
            text: &notification.subject,
        };

        let response = self.client.post(self.endpoint()).json(&payload).send().await?;
        ensure_success(response, "Telegram API").await
    }
}
