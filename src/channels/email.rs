//! Email sink — SMTP delivery via lettre.
//!
//! Each composed post becomes one multipart/mixed message: the HTML body
//! first, then every staged attachment as `application/octet-stream`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::DeliveryError;
use crate::pipeline::types::{ComposedDocument, DeliverySink};

/// Port on which SMTP runs over implicit TLS; any other port uses STARTTLS.
pub const IMPLICIT_TLS_PORT: u16 = 465;

// ── Configuration ───────────────────────────────────────────────────

/// SMTP sink configuration.
#[derive(Debug)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Account used both for login and as the `From` address.
    pub sender: String,
    pub password: SecretString,
    pub recipient: String,
    pub timeout: Duration,
}

// ── Sink ────────────────────────────────────────────────────────────

/// Delivers composed posts to a single fixed recipient.
pub struct SmtpSink {
    config: Arc<EmailConfig>,
}

impl SmtpSink {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Build the outgoing message. Attachments whose staged file has gone
    /// missing are skipped with a warning.
    pub fn build_message(&self, document: &ComposedDocument) -> Result<Message, DeliveryError> {
        build_message(&self.config, document)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| DeliveryError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn build_message(config: &EmailConfig, document: &ComposedDocument) -> Result<Message, DeliveryError> {
    let octet_stream = ContentType::parse("application/octet-stream")
        .map_err(|e| DeliveryError::Build(format!("content type: {e}")))?;

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(document.body.clone()));
    for staged in &document.attachments {
        let bytes = match std::fs::read(&staged.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    file = %staged.path.display(),
                    "Staged attachment missing, skipping"
                );
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        body = body.singlepart(Attachment::new(staged.name.clone()).body(bytes, octet_stream.clone()));
    }

    Message::builder()
        .from(parse_mailbox(&config.sender)?)
        .to(parse_mailbox(&config.recipient)?)
        .subject(document.subject.clone())
        .date_now()
        .multipart(body)
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

fn send(config: &EmailConfig, message: &Message) -> Result<(), DeliveryError> {
    let creds = Credentials::new(
        config.sender.clone(),
        config.password.expose_secret().to_string(),
    );

    let builder = if config.smtp_port == IMPLICIT_TLS_PORT {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    }
    .map_err(|e| DeliveryError::Transport(format!("SMTP relay error: {e}")))?;

    let transport = builder
        .port(config.smtp_port)
        .credentials(creds)
        .timeout(Some(config.timeout))
        .build();

    transport
        .send(message)
        .map_err(|e| DeliveryError::Transport(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl DeliverySink for SmtpSink {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, document: &ComposedDocument) -> Result<(), DeliveryError> {
        let config = Arc::clone(&self.config);
        let document = document.clone();

        // lettre's SmtpTransport is blocking
        tokio::task::spawn_blocking(move || {
            let message = build_message(&config, &document)?;
            send(&config, &message)?;
            tracing::info!(
                recipient = %config.recipient,
                subject = %document.subject,
                attachments = document.attachments.len(),
                "Email sent"
            );
            Ok(())
        })
        .await
        .map_err(|e| DeliveryError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::StagedFile;
    use tempfile::TempDir;

    fn config(port: u16) -> EmailConfig {
        EmailConfig {
            smtp_host: "127.0.0.1".into(),
            smtp_port: port,
            sender: "bot@example.com".into(),
            password: SecretString::from("app-password"),
            recipient: "me@example.com".into(),
            timeout: Duration::from_secs(2),
        }
    }

    fn document(attachments: Vec<StagedFile>) -> ComposedDocument {
        ComposedDocument {
            subject: "Telegram post - 2024-05-01 10:00:00".into(),
            body: "<html><body><div>hello</div></body></html>".into(),
            attachments,
        }
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    #[test]
    fn message_has_html_part_and_attachments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo_u1.jpg");
        std::fs::write(&path, b"jpeg bytes").unwrap();

        let sink = SmtpSink::new(config(465));
        let msg = sink
            .build_message(&document(vec![StagedFile {
                name: "photo_u1.jpg".into(),
                path,
                size: 10,
            }]))
            .unwrap();
        let raw = formatted(&msg);

        assert!(raw.contains("Subject: Telegram post - 2024-05-01 10:00:00"));
        assert!(raw.contains("From: bot@example.com"));
        assert!(raw.contains("To: me@example.com"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("application/octet-stream"));
        assert!(raw.contains("photo_u1.jpg"));
        assert!(raw.find("text/html") < raw.find("application/octet-stream"));
    }

    #[test]
    fn missing_staged_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let sink = SmtpSink::new(config(465));
        let msg = sink
            .build_message(&document(vec![StagedFile {
                name: "gone.bin".into(),
                path: dir.path().join("gone.bin"),
                size: 1,
            }]))
            .unwrap();
        let raw = formatted(&msg);

        assert!(raw.contains("text/html"));
        assert!(!raw.contains("gone.bin"));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let mut cfg = config(465);
        cfg.recipient = "not an address".into();
        let err = SmtpSink::new(cfg).build_message(&document(vec![])).unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn deliver_reports_transport_failure() {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let sink = SmtpSink::new(config(1));
        let err = sink.deliver(&document(vec![])).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert_eq!(sink.name(), "email");
    }
}
