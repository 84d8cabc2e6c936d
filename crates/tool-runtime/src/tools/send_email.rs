use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use errand_core::policy::EmailPolicy;
use errand_notify::{AttachmentSource, EmailAttachment, MailError, Mailer, OutgoingEmail};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::schema::{is_email, Violation};
use crate::tool::{Tool, ToolError, ToolInput, ToolOutcome};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Recipient-domain allowlist and a sliding one-minute send budget,
/// shared by every tool that sends mail.
pub struct EmailGuard {
    policy: EmailPolicy,
    sent: Mutex<VecDeque<Instant>>,
}

impl EmailGuard {
    pub fn new(policy: EmailPolicy) -> Self {
        Self {
            policy,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    /// Admit one message to `recipients`, or return the failure to report.
    pub fn admit<'a>(&self, recipients: impl IntoIterator<Item = &'a String>) -> Result<(), ToolOutcome> {
        if let Some(blocked) = recipients.into_iter().find(|r| !self.policy.allows(r)) {
            warn!(recipient = %blocked, "recipient domain is not allowlisted");
            return Err(ToolOutcome::failure_with("invalid_domain", blocked.clone()));
        }

        let now = Instant::now();
        let mut sent = self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while sent.front().is_some_and(|t| now.duration_since(*t) >= RATE_WINDOW) {
            sent.pop_front();
        }
        if sent.len() >= self.policy.max_per_minute as usize {
            return Err(ToolOutcome::failure("rate_limited"));
        }
        sent.push_back(now);
        Ok(())
    }
}

/// A single address, a `,`/`;`/newline separated list, or an array.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Recipients {
    List(Vec<String>),
    Text(String),
}

impl Default for Recipients {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl Recipients {
    /// Trimmed, non-empty addresses.
    pub fn addresses(&self) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Text(text) => text.split([',', ';', '\n']).collect(),
        };
        parts
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AttachmentInput {
    pub filename: String,
    /// Local file to attach.
    pub path: Option<String>,
    /// Inline content (plain text, or base64 with `encoding: "base64"`).
    pub content: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub encoding: Option<String>,
}

impl AttachmentInput {
    fn is_base64(&self) -> bool {
        self.encoding
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("base64"))
    }

    fn to_attachment(&self) -> EmailAttachment {
        let source = match (&self.path, &self.content) {
            (Some(path), _) => AttachmentSource::Path(path.into()),
            (None, Some(content)) if self.is_base64() => {
                AttachmentSource::Inline(BASE64.decode(content.trim()).unwrap_or_default())
            }
            (None, Some(content)) => AttachmentSource::Inline(content.clone().into_bytes()),
            (None, None) => AttachmentSource::Inline(Vec::new()),
        };
        EmailAttachment {
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            source,
        }
    }
}

fn default_subject() -> String {
    "(No Subject)".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    #[serde(default)]
    pub to: Recipients,
    #[serde(default = "default_subject")]
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
    /// Sender address; defaults to the configured sender.
    pub from: Option<String>,
    pub attachments: Option<Vec<AttachmentInput>>,
}

impl ToolInput for SendEmailInput {
    fn check(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        let to = self.to.addresses();
        if to.is_empty() {
            violations.push(Violation::at("to", "Recipient required"));
        }
        for (i, address) in to.iter().enumerate() {
            if !is_email(address) {
                violations.push(Violation::at(format!("to.{i}"), "invalid email address"));
            }
        }
        for (field, list) in [("cc", &self.cc), ("bcc", &self.bcc)] {
            for (i, address) in list.iter().flatten().enumerate() {
                if !is_email(address) {
                    violations.push(Violation::at(format!("{field}.{i}"), "invalid email address"));
                }
            }
        }
        for (i, attachment) in self.attachments.iter().flatten().enumerate() {
            match (&attachment.path, &attachment.content) {
                (None, None) => {
                    violations.push(Violation::at(format!("attachments.{i}"), "path or content required"));
                }
                (None, Some(content)) if attachment.is_base64() && BASE64.decode(content.trim()).is_err() => {
                    violations.push(Violation::at(format!("attachments.{i}.content"), "invalid base64"));
                }
                _ => {}
            }
        }
        violations
    }
}

impl SendEmailInput {
    fn to_email(&self) -> OutgoingEmail {
        OutgoingEmail {
            from: self.from.clone().filter(|f| !f.trim().is_empty()),
            to: self.to.addresses(),
            cc: self.cc.clone().unwrap_or_default(),
            bcc: self.bcc.clone().unwrap_or_default(),
            subject: self.subject.clone(),
            text: self.text.clone(),
            html: self.html.clone(),
            attachments: self
                .attachments
                .iter()
                .flatten()
                .map(AttachmentInput::to_attachment)
                .collect(),
        }
    }
}

pub struct SendEmailTool {
    mailer: Arc<dyn Mailer>,
    guard: Arc<EmailGuard>,
}

impl SendEmailTool {
    pub fn new(mailer: Arc<dyn Mailer>, guard: Arc<EmailGuard>) -> Self {
        Self { mailer, guard }
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    type Input = SendEmailInput;

    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email to one or more recipients"
    }

    async fn execute(&self, input: SendEmailInput) -> Result<ToolOutcome, ToolError> {
        let email = input.to_email();
        if let Err(outcome) = self.guard.admit(email.recipients()) {
            return Ok(outcome);
        }

        info!(
            transport = self.mailer.transport_name(),
            to = ?email.to,
            subject = %email.subject,
            "sending email"
        );
        match self.mailer.send(&email).await {
            Ok(receipt) => Ok(ToolOutcome::ok(json!({
                "ok": true,
                "message_id": receipt.message_id,
                "accepted": receipt.accepted,
                "rejected": receipt.rejected,
                "response": receipt.response,
            }))),
            Err(MailError::Address { address, reason }) => Ok(ToolOutcome::failure_with(
                "invalid_address",
                format!("{address}: {reason}"),
            )),
            Err(e) => Err(ToolError::ExecutionFailed(e.to_string())),
        }
    }
}
