//! Transition notifications
//!
//! The check pipeline only sees [`NotificationDispatcher`]. [`Notifier`]
//! implements it by looking up each owner's enabled destinations and fanning
//! the message out over the configured senders.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::NotificationSettings;
use crate::database::MonitorStore;
use crate::database::models::{Monitor, NotificationChannel};

pub mod senders;

pub use senders::{Notification, NotificationEvent, NotificationSender, SenderError};
use senders::{EmailSender, TelegramSender, WebhookSender};

/// Receives state transitions detected by the check pipeline.
///
/// Implementations report their own failures; nothing is returned.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_down(&self, monitor: &Monitor, message: &str);
    async fn notify_up(&self, monitor: &Monitor);
}

/// Dispatcher backed by stored notification preferences
pub struct Notifier {
    store: Arc<dyn MonitorStore>,
    senders: Vec<Arc<dyn NotificationSender>>,
    default_telegram_chat: Option<String>,
    fallback_email: Option<String>,
    send_timeout: Duration,
}

impl Notifier {
    pub fn new(store: Arc<dyn MonitorStore>, send_timeout: Duration) -> Self {
        Self {
            store,
            senders: Vec::new(),
            default_telegram_chat: None,
            fallback_email: None,
            send_timeout,
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.push(sender);
        self
    }

    /// Chat that receives every Telegram notification in addition to the
    /// owner's own preferences
    pub fn with_default_telegram_chat(mut self, chat_id: Option<String>) -> Self {
        self.default_telegram_chat = chat_id.filter(|chat| !chat.trim().is_empty());
        self
    }

    /// Address that receives email when the owner has no enabled email
    /// preference
    pub fn with_fallback_email(mut self, address: Option<String>) -> Self {
        self.fallback_email = address.filter(|address| !address.trim().is_empty());
        self
    }

    /// Build the senders enabled by configuration
    pub fn from_settings(store: Arc<dyn MonitorStore>, settings: &NotificationSettings) -> Result<Self> {
        let client = Client::builder().timeout(settings.request_timeout()).build()?;
        let mut notifier = Self::new(store, settings.request_timeout());

        match settings
            .telegram_bot_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
        {
            Some(token) => {
                notifier = notifier
                    .with_sender(Arc::new(TelegramSender::new(
                        client.clone(),
                        token,
                        settings.telegram_api_base.as_str(),
                    )))
                    .with_default_telegram_chat(settings.telegram_default_chat_id.clone());
            }
            None => debug!("Telegram notifications disabled: no bot token configured"),
        }

        match settings.smtp_host.as_deref().filter(|host| !host.trim().is_empty()) {
            Some(host) => {
                notifier = notifier
                    .with_sender(Arc::new(EmailSender::smtp(host, settings)?))
                    .with_fallback_email(settings.email_fallback_recipient.clone());
            }
            None => debug!("Email notifications disabled: no SMTP host configured"),
        }

        if settings.webhooks_enabled {
            notifier = notifier.with_sender(Arc::new(WebhookSender::new(client)));
        }

        info!(senders = notifier.senders.len(), "Notifier ready");
        Ok(notifier)
    }

    async fn recipients(&self, monitor: &Monitor, channel: NotificationChannel) -> Vec<String> {
        let mut destinations = match self
            .store
            .notification_destinations(monitor.owner_id, channel)
            .await
        {
            Ok(destinations) => destinations,
            Err(e) => {
                error!(monitor_id = monitor.id, %channel, error = %e, "Failed to load notification preferences");
                Vec::new()
            }
        };

        match channel {
            NotificationChannel::Telegram => {
                if let Some(chat) = &self.default_telegram_chat {
                    if !destinations.contains(chat) {
                        destinations.push(chat.clone());
                    }
                }
            }
            NotificationChannel::Email if destinations.is_empty() => {
                destinations.extend(self.fallback_email.clone());
            }
            NotificationChannel::Email | NotificationChannel::Webhook => {}
        }

        destinations
    }

    /// Send to every recipient concurrently; returns the number of
    /// successful deliveries
    pub async fn dispatch(&self, monitor: &Monitor, notification: &Notification) -> usize {
        let mut deliveries = Vec::new();
        for sender in &self.senders {
            for destination in self.recipients(monitor, sender.channel()).await {
                deliveries.push(self.deliver(sender, destination, notification));
            }
        }

        if deliveries.is_empty() {
            debug!(monitor_id = monitor.id, "No notification recipients");
            return 0;
        }

        let attempted = deliveries.len();
        let delivered = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();
        info!(
            monitor_id = monitor.id,
            event = ?notification.event,
            attempted,
            delivered,
            "Notifications dispatched"
        );
        delivered
    }

    async fn deliver(
        &self,
        sender: &Arc<dyn NotificationSender>,
        destination: String,
        notification: &Notification,
    ) -> bool {
        let channel = sender.channel();
        match timeout(self.send_timeout, sender.send(&destination, notification)).await {
            Ok(Ok(())) => {
                debug!(monitor_id = notification.monitor_id, %channel, "Notification delivered");
                true
            }
            Ok(Err(e)) => {
                warn!(monitor_id = notification.monitor_id, %channel, error = %e, "Notification delivery failed");
                false
            }
            Err(_) => {
                warn!(monitor_id = notification.monitor_id, %channel, "Notification delivery timed out");
                false
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for Notifier {
    async fn notify_down(&self, monitor: &Monitor, message: &str) {
        self.dispatch(monitor, &Notification::down(monitor, message)).await;
    }

    async fn notify_up(&self, monitor: &Monitor) {
        self.dispatch(monitor, &Notification::up(monitor)).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    pub fn sample_monitor() -> Monitor {
        let now = Utc::now();
        Monitor {
            id: 1,
            owner_id: 1,
            name: "api".into(),
            target: "https://example.com/health".into(),
            interval_seconds: 60,
            timeout_seconds: 10,
            is_paused: false,
            last_check_at: None,
            last_status_code: None,
            last_is_up: None,
            last_latency_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Local HTTP endpoint answering every request with `status`; the raw
    /// requests (head and body) come out of the returned channel.
    pub async fn capture_requests(status: u16) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut raw = Vec::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        raw.extend_from_slice(&buf[..n]);
                        if request_complete(&raw) {
                            break;
                        }
                    }
                    let _ = tx.send(String::from_utf8_lossy(&raw).to_string());

                    let response =
                        format!("HTTP/1.1 {status} Test\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{addr}"), rx)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..head_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= head_end + 4 + content_length
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum DispatchedEvent {
        Down { monitor_id: i64, message: String },
        Up { monitor_id: i64 },
    }

    /// Dispatcher that only remembers what it was asked to send
    #[derive(Default)]
    pub struct RecordingDispatcher {
        events: Mutex<Vec<DispatchedEvent>>,
    }

    impl RecordingDispatcher {
        pub fn events(&self) -> Vec<DispatchedEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn down_count(&self) -> usize {
            self.events()
                .iter()
                .filter(|event| matches!(event, DispatchedEvent::Down { .. }))
                .count()
        }

        pub fn up_count(&self) -> usize {
            self.events()
                .iter()
                .filter(|event| matches!(event, DispatchedEvent::Up { .. }))
                .count()
        }
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn notify_down(&self, monitor: &Monitor, message: &str) {
            self.events.lock().unwrap().push(DispatchedEvent::Down {
                monitor_id: monitor.id,
                message: message.to_string(),
            });
        }

        async fn notify_up(&self, monitor: &Monitor) {
            self.events
                .lock()
                .unwrap()
                .push(DispatchedEvent::Up { monitor_id: monitor.id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewMonitor, NotificationPreference};
    use crate::database::testing::create_test_store;
    use std::sync::Mutex;

    struct RecordingSender {
        channel: NotificationChannel,
        fail_for: Option<String>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        fn new(channel: NotificationChannel) -> Self {
            Self { channel, fail_for: None, sent: Mutex::new(Vec::new()) }
        }

        fn sent(&self) -> Vec<(String, String)> {
            let mut sent = self.sent.lock().unwrap().clone();
            sent.sort();
            sent
        }
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        fn channel(&self) -> NotificationChannel {
            self.channel
        }

        async fn send(&self, destination: &str, notification: &Notification) -> Result<(), SenderError> {
            if self.fail_for.as_deref() == Some(destination) {
                return Err(SenderError::SendFailed("boom".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((destination.to_string(), notification.subject.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_down_goes_to_enabled_preferences_and_default_chat() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let monitor = store.insert_monitor(&NewMonitor::new(5, "shop", "https://shop.example")).await?;
        store
            .save_notification_preference(&NotificationPreference::new(5, NotificationChannel::Telegram, "111"))
            .await?;
        let mut disabled = NotificationPreference::new(5, NotificationChannel::Telegram, "222");
        disabled.is_enabled = false;
        store.save_notification_preference(&disabled).await?;

        let telegram = Arc::new(RecordingSender::new(NotificationChannel::Telegram));
        let notifier = Notifier::new(store.clone(), Duration::from_secs(5))
            .with_sender(telegram.clone())
            .with_default_telegram_chat(Some("999".into()));

        notifier.notify_down(&monitor, "Status 503").await;

        assert_eq!(
            telegram.sent(),
            vec![
                ("111".to_string(), "shop is DOWN".to_string()),
                ("999".to_string(), "shop is DOWN".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_email_falls_back_only_without_preferences() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let without = store.insert_monitor(&NewMonitor::new(5, "shop", "https://shop.example")).await?;
        let with = store.insert_monitor(&NewMonitor::new(6, "blog", "https://blog.example")).await?;
        store
            .save_notification_preference(&NotificationPreference::new(
                6,
                NotificationChannel::Email,
                "owner6@example.com",
            ))
            .await?;

        let email = Arc::new(RecordingSender::new(NotificationChannel::Email));
        let notifier = Notifier::new(store.clone(), Duration::from_secs(5))
            .with_sender(email.clone())
            .with_fallback_email(Some("oncall@example.com".into()));

        notifier.notify_down(&without, "Status 500").await;
        notifier.notify_up(&with).await;

        assert_eq!(
            email.sent(),
            vec![
                ("oncall@example.com".to_string(), "shop is DOWN".to_string()),
                ("owner6@example.com".to_string(), "blog is back UP".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_stop_others() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let monitor = store.insert_monitor(&NewMonitor::new(5, "shop", "https://shop.example")).await?;
        for destination in ["https://a.example/hook", "https://b.example/hook"] {
            store
                .save_notification_preference(&NotificationPreference::new(
                    5,
                    NotificationChannel::Webhook,
                    destination,
                ))
                .await?;
        }

        let webhook = Arc::new(RecordingSender {
            fail_for: Some("https://a.example/hook".into()),
            ..RecordingSender::new(NotificationChannel::Webhook)
        });
        let notifier = Notifier::new(store.clone(), Duration::from_secs(5)).with_sender(webhook.clone());

        let delivered = notifier.dispatch(&monitor, &Notification::up(&monitor)).await;
        assert_eq!(delivered, 1);
        assert_eq!(
            webhook.sent(),
            vec![("https://b.example/hook".to_string(), "shop is back UP".to_string())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_no_senders_configured() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let notifier = Notifier::from_settings(store, &NotificationSettings::default())?;
        let delivered = notifier
            .dispatch(&testing::sample_monitor(), &Notification::up(&testing::sample_monitor()))
            .await;
        assert_eq!(delivered, 0);
        Ok(())
    }

    #[test]
    fn test_rendered_messages() {
        let monitor = testing::sample_monitor();
        let down = Notification::down(&monitor, "Timed out after 10s");
        assert_eq!(down.subject, "api is DOWN");
        assert!(down.body.contains("URL: https://example.com/health"));
        assert!(down.body.contains("Details: Timed out after 10s"));

        let up = Notification::up(&monitor);
        assert_eq!(up.subject, "api is back UP");
        assert_eq!(up.event, NotificationEvent::Up);
    }
}
