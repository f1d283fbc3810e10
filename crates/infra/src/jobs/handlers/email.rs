//! `EMAIL_NOTIFICATION`: send a transactional email.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::decode_payload;
use crate::jobs::registry::{JobError, JobHandler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    /// Template name, used when no body is given.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl EmailMessage {
    /// Plain-text part: `body`, else the template rendered as `key: value` lines.
    pub fn text_body(&self) -> String {
        if let Some(body) = &self.body {
            return body.clone();
        }

        let mut text = self.template.clone().unwrap_or_default();
        if let Some(Value::Object(fields)) = &self.data {
            for (key, value) in fields {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                text.push_str(&format!("\n{key}: {value}"));
            }
        }
        text
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("smtp transport error: {0}")]
    Transport(String),
}

impl From<MailError> for JobError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Transport(_) => JobError::failed(err.to_string()),
            MailError::InvalidAddress { .. } | MailError::Build(_) => {
                JobError::permanent(err.to_string())
            }
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

pub struct EmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl EmailHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl JobHandler for EmailHandler {
    async fn handle(&self, payload: &Value) -> Result<(), JobError> {
        let message: EmailMessage = decode_payload(payload)?;
        if message.subject.trim().is_empty() {
            return Err(JobError::invalid_payload("subject is empty"));
        }
        // Reject bad recipients before touching the transport.
        parse_mailbox(&message.to)?;

        self.mailer.send(&message).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// Sends over SMTP with STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let from = parse_mailbox(&config.from)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        info!(host = %config.host, port = config.port, "smtp mailer configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let email = build_message(&self.from, message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        debug!(subject = %message.subject, "email sent");
        Ok(())
    }
}

pub(crate) fn build_message(from: &Mailbox, message: &EmailMessage) -> Result<Message, MailError> {
    let builder = Message::builder()
        .from(from.clone())
        .to(parse_mailbox(&message.to)?)
        .subject(&message.subject);

    let built = match &message.html {
        Some(html) => builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(message.text_body()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
        ),
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.text_body()),
    };

    built.map_err(|e| MailError::Build(e.to_string()))
}

/// Logs instead of sending; used when SMTP is not configured.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(
            subject = %message.subject,
            template = ?message.template,
            "smtp not configured, email logged instead of sent"
        );
        Ok(())
    }
}

/// Captures messages in memory (tests/dev).
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FlakyTransport;

    #[async_trait]
    impl Mailer for FlakyTransport {
        async fn send(&self, _message: &EmailMessage) -> Result<(), MailError> {
            Err(MailError::Transport("421 service not available".into()))
        }
    }

    #[tokio::test]
    async fn sends_decoded_message() {
        let mailer = Arc::new(RecordingMailer::default());
        let handler = EmailHandler::new(mailer.clone());

        handler
            .handle(&json!({"to": "owner@shop.test", "subject": "Daily summary", "body": "All good"}))
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Daily summary");
    }

    #[tokio::test]
    async fn invalid_recipient_is_permanent() {
        let mailer = Arc::new(RecordingMailer::default());
        let handler = EmailHandler::new(mailer.clone());

        let err = handler
            .handle(&json!({"to": "not an address", "subject": "Hi"}))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Permanent(_)));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_subject_is_invalid_payload() {
        let handler = EmailHandler::new(Arc::new(RecordingMailer::default()));
        let err = handler.handle(&json!({"to": "a@b.test"})).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_retryable() {
        let handler = EmailHandler::new(Arc::new(FlakyTransport));
        let err = handler
            .handle(&json!({"to": "a@b.test", "subject": "Hi"}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn template_renders_data_lines_when_body_missing() {
        let message = EmailMessage {
            to: "a@b.test".into(),
            subject: "Low stock".into(),
            body: None,
            html: None,
            template: Some("low_stock".into()),
            data: Some(json!({"sku": "COF-250", "onHand": 3})),
        };

        let text = message.text_body();
        assert!(text.starts_with("low_stock"));
        assert!(text.contains("sku: COF-250"));
        assert!(text.contains("onHand: 3"));
    }

    #[test]
    fn builds_multipart_when_html_present() {
        let from = parse_mailbox("no-reply@tillpoint.local").unwrap();
        let message = EmailMessage {
            to: "a@b.test".into(),
            subject: "Receipt".into(),
            body: Some("Thanks".into()),
            html: Some("<p>Thanks</p>".into()),
            template: None,
            data: None,
        };

        let formatted = String::from_utf8(build_message(&from, &message).unwrap().formatted()).unwrap();
        assert!(formatted.contains("Subject: Receipt"));
        assert!(formatted.contains("multipart/alternative"));
    }

    #[test]
    fn smtp_mailer_rejects_bad_sender() {
        let config = SmtpConfig {
            host: "smtp.example.test".into(),
            port: 587,
            username: None,
            password: None,
            from: "nope".into(),
        };
        assert!(matches!(
            SmtpMailer::new(&config),
            Err(MailError::InvalidAddress { .. })
        ));
    }
}
