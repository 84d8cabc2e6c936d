//! Outgoing email for the agent's tools.
//!
//! This crate provides:
//! - `Mailer` trait for pluggable delivery
//! - SMTP implementation over `lettre`
//! - Email template catalog rendered with minijinja

pub mod email;
pub mod templating;
pub mod traits;

pub use email::{SmtpMailer, SmtpSettings};
pub use templating::{EmailTemplate, RenderedEmail, TemplateCatalog, TemplateRenderer};
pub use traits::{AttachmentSource, EmailAttachment, MailError, Mailer, OutgoingEmail, SendReceipt};
