//! Email sender agent.
//!
//! Builds a multipart message (text/html alternative plus attachments) and
//! hands it to a [`MailTransport`]. The production transport speaks SMTP
//! through lettre (STARTTLS, SMTPS, or plain per config); tests use
//! [`RecordingTransport`].
//!
//! Matching the other side-effecting agents, every failure (including
//! input validation) comes back as an error payload with
//! `email_sent: false` rather than a node failure.

use crate::registry::Agent;
use agentflow_workflow::agent::{AgentInput, AgentMetadata, AgentOutcome};
use agentflow_workflow::error::AgentFailure;
use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

/// SMTP settings resolved from the agent's config map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    /// SMTP server hostname.
    pub server: String,
    /// SMTP port.
    pub port: u16,
    /// Login username (also the default From address).
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// STARTTLS after connecting.
    pub use_tls: bool,
    /// Implicit TLS (SMTPS).
    pub use_ssl: bool,
}

impl SmtpSettings {
    fn from_config(config: &JsonValue) -> Self {
        Self {
            server: config
                .get("smtp_server")
                .and_then(JsonValue::as_str)
                .unwrap_or("smtp.gmail.com")
                .to_string(),
            port: config
                .get("smtp_port")
                .and_then(JsonValue::as_u64)
                .unwrap_or(587) as u16,
            username: config
                .get("username")
                .and_then(JsonValue::as_str)
                .map(ToString::to_string),
            password: config
                .get("password")
                .and_then(JsonValue::as_str)
                .map(ToString::to_string),
            use_tls: config
                .get("use_tls")
                .and_then(JsonValue::as_bool)
                .unwrap_or(true),
            use_ssl: config
                .get("use_ssl")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
        }
    }
}

/// A fully rendered attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAttachment {
    /// Attachment filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

/// A fully rendered email ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    /// From address.
    pub from: String,
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon-copy recipients.
    pub cc: Vec<String>,
    /// Blind-carbon-copy recipients.
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: Option<String>,
    /// HTML body.
    pub html_body: Option<String>,
    /// Attachments.
    pub attachments: Vec<RenderedAttachment>,
    /// Message-ID assigned before sending.
    pub message_id: String,
}

impl RenderedEmail {
    /// All envelope recipients: to + cc + bcc.
    #[must_use]
    pub fn all_recipients(&self) -> Vec<String> {
        let mut recipients = self.to.clone();
        recipients.extend(self.cc.clone());
        recipients.extend(self.bcc.clone());
        recipients
    }
}

/// Where rendered emails go.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Delivers the email through the configured SMTP settings.
    async fn deliver(
        &self,
        settings: &SmtpSettings,
        email: &RenderedEmail,
    ) -> Result<(), AgentFailure>;
}

/// Production SMTP transport over lettre.
///
/// A transport is built per send; the original system opened one SMTP
/// session per message too.
pub struct SmtpMailer;

impl SmtpMailer {
    /// Creates the mailer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn build_message(email: &RenderedEmail) -> Result<Message, AgentFailure> {
        let parse_mailbox = |address: &str| -> Result<Mailbox, AgentFailure> {
            address.parse().map_err(|_| AgentFailure::InvalidInput {
                message: format!("invalid email address: {address}"),
            })
        };

        let mut builder = Message::builder()
            .from(parse_mailbox(&email.from)?)
            .subject(email.subject.clone())
            .message_id(Some(email.message_id.clone()));
        for address in &email.to {
            builder = builder.to(parse_mailbox(address)?);
        }
        for address in &email.cc {
            builder = builder.cc(parse_mailbox(address)?);
        }
        for address in &email.bcc {
            builder = builder.bcc(parse_mailbox(address)?);
        }

        let alternative = match (&email.body, &email.html_body) {
            (Some(text), Some(html)) => {
                MultiPart::alternative_plain_html(text.clone(), html.clone())
            }
            (Some(text), None) => MultiPart::alternative().singlepart(SinglePart::plain(text.clone())),
            (None, Some(html)) => MultiPart::alternative().singlepart(SinglePart::html(html.clone())),
            (None, None) => MultiPart::alternative().singlepart(SinglePart::plain(String::new())),
        };

        let message = if email.attachments.is_empty() {
            builder.multipart(alternative)
        } else {
            let mut mixed = MultiPart::mixed().multipart(alternative);
            for attachment in &email.attachments {
                let content_type = ContentType::parse(&attachment.mime_type).map_err(|_| {
                    AgentFailure::InvalidInput {
                        message: format!("invalid mime type: {}", attachment.mime_type),
                    }
                })?;
                mixed = mixed.singlepart(
                    Attachment::new(attachment.filename.clone())
                        .body(attachment.data.clone(), content_type),
                );
            }
            builder.multipart(mixed)
        };

        message.map_err(|e| AgentFailure::Internal {
            message: format!("failed to build message: {e}"),
        })
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn deliver(
        &self,
        settings: &SmtpSettings,
        email: &RenderedEmail,
    ) -> Result<(), AgentFailure> {
        let (Some(username), Some(password)) = (&settings.username, &settings.password) else {
            return Err(AgentFailure::Auth {
                message: "SMTP username and password must be configured".to_string(),
            });
        };

        let message = Self::build_message(email)?;

        let builder = if settings.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.server)
        } else if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &settings.server,
            ))
        }
        .map_err(|e| AgentFailure::Transport {
            message: e.to_string(),
        })?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(username.clone(), password.clone()))
            .build();

        // The send itself runs to completion even if cancellation fires;
        // cancellation is observed between agent suspension points only.
        transport.send(message).await.map_err(|e| {
            if e.is_permanent() && e.to_string().contains("535") {
                AgentFailure::Auth {
                    message: e.to_string(),
                }
            } else {
                AgentFailure::Transport {
                    message: e.to_string(),
                }
            }
        })?;

        Ok(())
    }
}

/// Test transport that records every delivery.
#[derive(Default)]
pub struct RecordingTransport {
    deliveries: std::sync::Mutex<Vec<(SmtpSettings, RenderedEmail)>>,
}

impl RecordingTransport {
    /// Returns all recorded deliveries.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(SmtpSettings, RenderedEmail)> {
        self.deliveries.lock().expect("deliveries lock").clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn deliver(
        &self,
        settings: &SmtpSettings,
        email: &RenderedEmail,
    ) -> Result<(), AgentFailure> {
        self.deliveries
            .lock()
            .expect("deliveries lock")
            .push((settings.clone(), email.clone()));
        Ok(())
    }
}

/// The email sender agent.
pub struct EmailSenderAgent {
    transport: Arc<dyn MailTransport>,
}

impl EmailSenderAgent {
    /// Creates the agent over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    async fn render(
        settings: &SmtpSettings,
        input: &AgentInput,
    ) -> Result<RenderedEmail, AgentFailure> {
        let string_list = |key: &str| -> Vec<String> {
            match input.get(key) {
                Some(JsonValue::Array(items)) => items
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(ToString::to_string)
                    .collect(),
                Some(JsonValue::String(single)) => vec![single.clone()],
                _ => Vec::new(),
            }
        };

        let to = string_list("to");
        let cc = string_list("cc");
        let bcc = string_list("bcc");
        let subject = input.get_str("subject").unwrap_or_default().to_string();
        let body = input.get_str("body").filter(|b| !b.is_empty()).map(ToString::to_string);
        let html_body = input
            .get_str("html_body")
            .filter(|b| !b.is_empty())
            .map(ToString::to_string);

        if to.is_empty() {
            return Err(AgentFailure::InvalidInput {
                message: "Recipient email addresses are required".to_string(),
            });
        }
        if subject.is_empty() {
            return Err(AgentFailure::InvalidInput {
                message: "Email subject is required".to_string(),
            });
        }
        if body.is_none() && html_body.is_none() {
            return Err(AgentFailure::InvalidInput {
                message: "Email body or HTML body is required".to_string(),
            });
        }

        let from = input
            .get_str("from")
            .map(ToString::to_string)
            .or_else(|| settings.username.clone())
            .ok_or_else(|| AgentFailure::InvalidInput {
                message: "No From address available".to_string(),
            })?;

        let mut attachments = Vec::new();
        if let Some(JsonValue::Array(entries)) = input.get("attachments") {
            for entry in entries {
                attachments.push(render_attachment(entry).await?);
            }
        }

        Ok(RenderedEmail {
            message_id: format!("<{}@{}>", Ulid::new(), settings.server),
            from,
            to,
            cc,
            bcc,
            subject,
            body,
            html_body,
            attachments,
        })
    }
}

async fn render_attachment(entry: &JsonValue) -> Result<RenderedAttachment, AgentFailure> {
    let mime_type = entry
        .get("mime_type")
        .and_then(JsonValue::as_str)
        .unwrap_or("application/octet-stream")
        .to_string();

    if let Some(file_path) = entry.get("file_path").and_then(JsonValue::as_str) {
        let data = tokio::fs::read(file_path)
            .await
            .map_err(|_| AgentFailure::InvalidInput {
                message: format!("attachment file not found: {file_path}"),
            })?;
        let filename = entry
            .get("filename")
            .and_then(JsonValue::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| {
                std::path::Path::new(file_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "attachment".to_string())
            });
        return Ok(RenderedAttachment {
            filename,
            mime_type,
            data,
        });
    }

    if let Some(content) = entry.get("content").and_then(JsonValue::as_str) {
        let filename = entry
            .get("filename")
            .and_then(JsonValue::as_str)
            .unwrap_or("attachment")
            .to_string();
        return Ok(RenderedAttachment {
            filename,
            mime_type,
            data: content.as_bytes().to_vec(),
        });
    }

    Err(AgentFailure::InvalidInput {
        message: "Either file_path or content must be provided for attachment".to_string(),
    })
}

#[async_trait]
impl Agent for EmailSenderAgent {
    async fn run(
        &self,
        config: &JsonValue,
        input: AgentInput,
        _cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentFailure> {
        let started_at = Utc::now();
        let settings = SmtpSettings::from_config(config);

        let attempt = async {
            let email = Self::render(&settings, &input).await?;
            self.transport.deliver(&settings, &email).await?;
            Ok::<RenderedEmail, AgentFailure>(email)
        }
        .await;

        let (output, variables) = match attempt {
            Ok(email) => {
                let recipients = email.all_recipients();
                let mut variables = Map::new();
                variables.insert("email_sent".to_string(), json!(true));
                variables.insert("recipients_count".to_string(), json!(email.to.len()));
                variables.insert(
                    "attachments_count".to_string(),
                    json!(email.attachments.len()),
                );
                variables.insert("message_id".to_string(), json!(email.message_id));
                (
                    json!({
                        "status": "sent",
                        "message_id": email.message_id,
                        "timestamp": Utc::now().to_rfc3339(),
                        "recipients": recipients,
                        "smtp_server": settings.server,
                    }),
                    variables,
                )
            }
            Err(error) => {
                tracing::warn!(error = %error, "email send failed");
                let mut variables = Map::new();
                variables.insert("email_sent".to_string(), json!(false));
                variables.insert("error_message".to_string(), json!(error.to_string()));
                (json!({"error": error.to_string()}), variables)
            }
        };

        Ok(AgentOutcome {
            output,
            variables,
            metadata: AgentMetadata::spanning(started_at),
        })
    }
}
