//! Mailer trait definition and shared error types.

use std::path::PathBuf;

use serde::Serialize;

/// Errors that can occur while building or delivering an email.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where an attachment's bytes come from.
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    /// Read from the local filesystem at send time.
    Path(PathBuf),
    /// Already in memory.
    Inline(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    /// MIME type; `application/octet-stream` when absent.
    pub content_type: Option<String>,
    pub source: AttachmentSource,
}

/// A fully-resolved email ready for delivery.
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    /// Overrides the mailer's default sender.
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<EmailAttachment>,
}

impl OutgoingEmail {
    /// Every envelope recipient (to, cc and bcc).
    pub fn recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }
}

/// What the SMTP server said about a delivered message.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
    pub response: String,
}

/// Delivery channel for outgoing email.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError>;

    /// Human-readable name for logs (e.g. "smtp").
    fn transport_name(&self) -> &str;
}
