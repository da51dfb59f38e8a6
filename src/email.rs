// src/email.rs

use std::str::FromStr;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor, message::Mailbox,
    transport::smtp::authentication::Credentials,
};
use parking_lot::Mutex;

use crate::config::SmtpConfig;
use crate::error::AppError;

/// Outgoing mail seam. The service only ever sends plain-text mail to a
/// single recipient, so the contract stays that narrow.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

/// Delivers through an SMTP relay. Port 465 uses implicit TLS, anything
/// else STARTTLS.
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, AppError> {
        let from = Mailbox::from_str(&config.from)
            .map_err(|e| AppError::InternalServerError(format!("Invalid SMTP_FROM: {}", e)))?;

        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| AppError::InternalServerError(format!("Invalid SMTP host: {}", e)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { from, transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let to = Mailbox::from_str(to)
            .map_err(|e| AppError::BadRequest(format!("Invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| AppError::InternalServerError(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::InternalServerError(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

/// Fallback when SMTP is not configured: logs instead of sending, so dev
/// setups still show the confirmation links.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        tracing::info!("Email to {} [{}]\n{}", to, subject, body);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OutboxEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// In-memory outbox for tests.
#[derive(Default)]
pub struct RecordingMailer {
    outbox: Mutex<Vec<OutboxEmail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> Vec<OutboxEmail> {
        self.outbox.lock().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        self.outbox.lock().push(OutboxEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
