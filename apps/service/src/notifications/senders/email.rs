use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt::Display;

use super::{Notification, NotificationSender, SenderError};
use crate::config::NotificationSettings;
use crate::database::models::NotificationChannel;

/// A sender delivering notifications as plain-text email.
pub struct EmailSender<T = AsyncSmtpTransport<Tokio1Executor>> {
    transport: T,
    from: Mailbox,
}

impl EmailSender {
    /// SMTP relay over STARTTLS, authenticated when credentials are configured
    pub fn smtp(host: &str, settings: &NotificationSettings) -> Result<Self, SenderError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| SenderError::InvalidConfiguration(format!("SMTP relay {host}: {e}")))?
            .port(settings.smtp_port)
            .timeout(Some(settings.request_timeout()));

        if let (Some(username), Some(password)) = (&settings.smtp_username, &settings.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Self::with_transport(builder.build(), &settings.email_from)
    }
}

impl<T> EmailSender<T> {
    pub fn with_transport(transport: T, from: &str) -> Result<Self, SenderError> {
        Ok(Self {
            transport,
            from: parse_mailbox(from)?,
        })
    }

    fn message(&self, destination: &str, notification: &Notification) -> Result<Message, SenderError> {
        Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(destination)?)
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| SenderError::SendFailed(format!("Failed to build email: {e}")))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SenderError> {
    address
        .trim()
        .parse()
        .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid email address '{address}': {e}")))
}

#[async_trait]
impl<T> NotificationSender for EmailSender<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: Display,
{
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    async fn send(&self, destination: &str, notification: &Notification) -> Result<(), SenderError> {
        let message = self.message(destination, notification)?;
        match self.transport.send(message).await {
            Ok(_) => Ok(()),
            Err(e) => Err(SenderError::SendFailed(format!("SMTP delivery failed: {e}"))),
        }
    }
}
