//! SMTP mailer via `lettre` with TLS support.
//!
//! Supports STARTTLS (default) and implicit TLS (port 465), optional
//! credentials, multipart text/html bodies and file attachments.

use crate::traits::{AttachmentSource, EmailAttachment, MailError, Mailer, OutgoingEmail, SendReceipt};
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

/// Sends email through an SMTP relay.
#[derive(Debug)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    /// Sender used when a message does not set its own.
    default_from: Mailbox,
}

/// Connection settings for [`SmtpMailer::from_config`].
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Implicit TLS instead of STARTTLS.
    pub implicit_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender address; falls back to `username` when unset.
    pub from: Option<String>,
}

impl SmtpMailer {
    /// Build a mailer from SMTP settings.
    ///
    /// Port 465 (or `implicit_tls`) uses implicit TLS; everything else
    /// negotiates STARTTLS. Credentials are attached only when both the
    /// username and password are present.
    pub fn from_config(settings: &SmtpSettings) -> Result<Self, MailError> {
        let from = settings
            .from
            .as_deref()
            .or(settings.username.as_deref())
            .ok_or_else(|| MailError::Config("FROM_EMAIL or SMTP_USER is required".to_string()))?;
        let default_from = parse_mailbox(from)?;

        let mut builder = if settings.implicit_tls || settings.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Config(e.to_string()))?
                .port(settings.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| MailError::Config(e.to_string()))?
                .port(settings.port)
        };

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            default_from,
        })
    }

    /// Assemble the MIME message for `email`.
    pub async fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        build_message(&self.default_from, email).await
    }
}

#[async_trait::async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        let message = self.build_message(email).await?;
        let message_id = message
            .headers()
            .get_raw("Message-ID")
            .unwrap_or_default()
            .to_string();
        let accepted: Vec<String> = email.recipients().cloned().collect();

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?;

        let response_text = format!(
            "{} {}",
            response.code(),
            response
                .message()
                .map(|line| line.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );

        tracing::info!(
            transport = "smtp",
            subject = %email.subject,
            recipients = accepted.len(),
            message_id = %message_id,
            "email delivered"
        );

        Ok(SendReceipt {
            message_id,
            accepted,
            rejected: Vec::new(),
            response: response_text,
        })
    }

    fn transport_name(&self) -> &str {
        "smtp"
    }
}

pub(crate) fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

async fn build_message(default_from: &Mailbox, email: &OutgoingEmail) -> Result<Message, MailError> {
    if email.to.is_empty() {
        return Err(MailError::Build("at least one recipient is required".to_string()));
    }

    let from = match &email.from {
        Some(addr) => parse_mailbox(addr)?,
        None => default_from.clone(),
    };

    let mut builder = Message::builder()
        .from(from)
        .subject(email.subject.clone())
        .message_id(None);
    for addr in &email.to {
        builder = builder.to(parse_mailbox(addr)?);
    }
    for addr in &email.cc {
        builder = builder.cc(parse_mailbox(addr)?);
    }
    for addr in &email.bcc {
        builder = builder.bcc(parse_mailbox(addr)?);
    }

    let body = body_part(email);
    let message = if email.attachments.is_empty() {
        builder.multipart(body)
    } else {
        let mut mixed = MultiPart::mixed().multipart(body);
        for attachment in &email.attachments {
            mixed = mixed.singlepart(attachment_part(attachment).await?);
        }
        builder.multipart(mixed)
    };

    message.map_err(|e| MailError::Build(e.to_string()))
}

/// Text and/or HTML body as a multipart container (single part when only one is present).
fn body_part(email: &OutgoingEmail) -> MultiPart {
    match (&email.text, &email.html) {
        (Some(text), Some(html)) => MultiPart::alternative_plain_html(text.clone(), html.clone()),
        (None, Some(html)) => MultiPart::mixed().singlepart(SinglePart::html(html.clone())),
        (Some(text), None) => MultiPart::mixed().singlepart(SinglePart::plain(text.clone())),
        (None, None) => MultiPart::mixed().singlepart(SinglePart::plain(String::new())),
    }
}

async fn attachment_part(attachment: &EmailAttachment) -> Result<SinglePart, MailError> {
    let bytes = match &attachment.source {
        AttachmentSource::Inline(bytes) => bytes.clone(),
        AttachmentSource::Path(path) => tokio::fs::read(path)
            .await
            .map_err(|source| MailError::Attachment {
                path: path.clone(),
                source,
            })?,
    };
    let content_type = ContentType::parse(
        attachment
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream"),
    )
    .map_err(|e| MailError::Build(format!("invalid content type: {e}")))?;

    Ok(Attachment::new(attachment.filename.clone()).body(bytes, content_type))
}
