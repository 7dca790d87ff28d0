//! Mail transport abstraction and providers.
//!
//! The dispatcher only sees the [`MailTransport`] trait and the
//! transient/permanent split on [`MailError`]; that classification is what
//! drives retry-vs-skip decisions per recipient.

use std::sync::Arc;

use async_trait::async_trait;
use fanwave_common::config::MailerConfig;
use fanwave_common::{AppError, AppResult};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

/// A classified mail transport failure.
#[derive(Debug, Error)]
pub enum MailError {
    /// Worth retrying: network failure, provider throttle, 5xx.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Never worth retrying: invalid address, suppressed recipient, 4xx.
    #[error("permanent transport error: {0}")]
    Permanent(String),
}

impl MailError {
    /// Whether the dispatcher should retry this failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One outgoing campaign email.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    /// Recipient address.
    pub to: String,
    /// Recipient display name.
    pub to_name: Option<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html_body: String,
    /// Plain text body.
    pub text_body: Option<String>,
    /// Correlation token carried through to webhook events.
    pub message_id: String,
}

/// Transport acknowledgement for one send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// The correlation token under which delivery events will arrive.
    pub message_id: String,
}

/// External email-sending provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send one message, classifying any failure.
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError>;
}

/// SMTP transport via lettre.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build an SMTP mailer from configuration.
    pub fn new(config: &MailerConfig) -> AppResult<Self> {
        let smtp = config
            .smtp
            .as_ref()
            .ok_or_else(|| AppError::Config("mailer.smtp section missing".to_string()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| AppError::Config(format!("Invalid SMTP relay: {e}")))?
            .port(smtp.port);

        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid from address: {e}")))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        let to: Mailbox = match &email.to_name {
            Some(name) => format!("{name} <{}>", email.to),
            None => email.to.clone(),
        }
        .parse()
        .map_err(|e| MailError::Permanent(format!("invalid recipient address: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(lettre::message::header::ContentType::TEXT_HTML)
            // Correlation token for webhook/tracking events
            .message_id(Some(format!("<{}@fanwave>", email.message_id)))
            .multipart(MultiPart::alternative_plain_html(
                email
                    .text_body
                    .clone()
                    .unwrap_or_else(|| email.subject.clone()),
                email.html_body.clone(),
            ))
            .map_err(|e| MailError::Permanent(format!("failed to build message: {e}")))?;

        match self.transport.send(message).await {
            Ok(_) => Ok(SendReceipt {
                message_id: email.message_id.clone(),
            }),
            Err(e) if e.is_permanent() => Err(MailError::Permanent(e.to_string())),
            Err(e) => Err(MailError::Transient(e.to_string())),
        }
    }
}

/// SendGrid transport over the v3 HTTP API.
#[derive(Clone)]
pub struct SendGridMailer {
    api_key: String,
    from_address: String,
    from_name: String,
    http_client: reqwest::Client,
}

impl SendGridMailer {
    /// Build a SendGrid mailer from configuration.
    pub fn new(config: &MailerConfig) -> AppResult<Self> {
        let sendgrid = config
            .sendgrid
            .as_ref()
            .ok_or_else(|| AppError::Config("mailer.sendgrid section missing".to_string()))?;

        Ok(Self {
            api_key: sendgrid.api_key.clone(),
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
            http_client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl MailTransport for SendGridMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        let body = serde_json::json!({
            "personalizations": [{
                "to": [{"email": email.to, "name": email.to_name}],
                // Echoed back on every webhook event for this message
                "custom_args": {"message_id": email.message_id}
            }],
            "from": {
                "email": self.from_address,
                "name": self.from_name
            },
            "subject": email.subject,
            "content": [
                {"type": "text/plain", "value": email.text_body.clone().unwrap_or_default()},
                {"type": "text/html", "value": email.html_body}
            ]
        });

        let response = self
            .http_client
            .post("https://api.sendgrid.com/v3/mail/send")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| MailError::Transient(format!("SendGrid request failed: {e}")))?;

        let status = response.status();

        if status.is_success() {
            Ok(SendReceipt {
                message_id: email.message_id.clone(),
            })
        } else {
            let error_text = response.text().await.unwrap_or_default();
            // 429 and 5xx are provider-side and worth retrying; other 4xx
            // mean this request will never succeed.
            if status.as_u16() == 429 || status.is_server_error() {
                Err(MailError::Transient(format!(
                    "SendGrid {status}: {error_text}"
                )))
            } else {
                Err(MailError::Permanent(format!(
                    "SendGrid {status}: {error_text}"
                )))
            }
        }
    }
}

/// Construct the configured mail transport.
pub fn build_transport(config: &MailerConfig) -> AppResult<Arc<dyn MailTransport>> {
    match config.provider.as_str() {
        "smtp" => Ok(Arc::new(SmtpMailer::new(config)?)),
        "sendgrid" => Ok(Arc::new(SendGridMailer::new(config)?)),
        other => Err(AppError::Config(format!("Unknown mail provider: {other}"))),
    }
}
