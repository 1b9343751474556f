//! Delivery channels for host notifications.

use crate::config::MailConfig;
use crate::metrics_defs::{NOTIFICATIONS_FAILED, NOTIFICATIONS_SENT};
use crate::notifications::messages::Notification;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use relay::HostUser;
use shared::counter;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, user: &HostUser, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sends every notification through each channel in turn.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl Notifier {
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Notifier { channels }
    }

    pub async fn notify(
        &self,
        user: &HostUser,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        for channel in &self.channels {
            match channel.send(user, notification).await {
                Ok(()) => {
                    counter!(NOTIFICATIONS_SENT, "channel" => channel.name()).increment(1);
                }
                Err(e) => {
                    tracing::error!(
                        channel = channel.name(),
                        user_id = user.id,
                        kind = notification.kind(),
                        error = %e,
                        "notification delivery failed"
                    );
                    counter!(NOTIFICATIONS_FAILED, "channel" => channel.name()).increment(1);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// Writes notifications to the log. Used when no mail transport is set up.
pub struct LogChannel;

#[async_trait]
impl NotifyChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, user: &HostUser, notification: &Notification) -> Result<(), NotifyError> {
        let mail = notification.to_mail();
        tracing::info!(
            user_id = user.id,
            email = %user.email,
            kind = notification.kind(),
            subject = %mail.subject,
            "notification"
        );
        Ok(())
    }
}

pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpChannel {
    pub fn new(config: &MailConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config.from.parse()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(SmtpChannel {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl NotifyChannel for SmtpChannel {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, user: &HostUser, notification: &Notification) -> Result<(), NotifyError> {
        let mail = notification.to_mail();
        let to = Mailbox::new(Some(user.name.clone()), user.email.parse()?);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&mail.subject)
            .multipart(MultiPart::alternative_plain_html(
                mail.render_text(),
                mail.render_html(),
            ))?;

        self.transport.send(message).await?;
        tracing::info!(user_id = user.id, subject = %mail.subject, "notification mailed");
        Ok(())
    }
}
