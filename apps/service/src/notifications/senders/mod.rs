use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::database::models::{Monitor, NotificationChannel};

pub mod email;
pub mod telegram;
pub mod webhook;

pub use email::EmailSender;
pub use telegram::TelegramSender;
pub use webhook::WebhookSender;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Which transition a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEvent {
    Down,
    Up,
}

/// A rendered notification, independent of the channel it goes out on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub monitor_id: i64,
    pub monitor_name: String,
    pub target: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn down(monitor: &Monitor, message: &str) -> Self {
        Self {
            event: NotificationEvent::Down,
            monitor_id: monitor.id,
            monitor_name: monitor.name.clone(),
            target: monitor.target.clone(),
            subject: format!("{} is DOWN", monitor.name),
            body: format!(
                "Monitor {} reported downtime.\nURL: {}\nDetails: {}",
                monitor.name, monitor.target, message
            ),
        }
    }

    pub fn up(monitor: &Monitor) -> Self {
        Self {
            event: NotificationEvent::Up,
            monitor_id: monitor.id,
            monitor_name: monitor.name.clone(),
            target: monitor.target.clone(),
            subject: format!("{} is back UP", monitor.name),
            body: format!("Monitor {} has recovered.\nURL: {}", monitor.name, monitor.target),
        }
    }
}

/// A trait for delivering notifications over one channel type.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Channel whose preferences this sender serves
    fn channel(&self) -> NotificationChannel;

    /// Deliver to a single destination (address, chat id or URL)
    async fn send(&self, destination: &str, notification: &Notification) -> Result<(), SenderError>;
}

/// Turn a non-success response into a `SendFailed` carrying its body
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    what: &str,
) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::SendFailed(format!(
        "{what} returned non-success status: {status}. Body: {error_body}"
    )))
}
