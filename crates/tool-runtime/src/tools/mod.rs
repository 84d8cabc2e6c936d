//! Built-in tools the agent can call.
//!
//! - `time_parse`: natural-language time to an ISO instant
//! - `schedule_alarm` / `list_alarms`: persisted one-shot or cron jobs
//! - `vault`: encrypted secrets, never echoed back
//! - `web_automate`: scripted headless browser runs
//! - `send_email` / `send_bulk_template`: outgoing mail behind the email policy

pub mod alarm;
pub mod browser;
pub mod bulk_send;
pub mod send_email;
pub mod time_parse;
pub mod vault;
pub mod web_automate;

pub use alarm::{ListAlarmsTool, ScheduleAlarmTool};
pub use browser::{BrowserError, BrowserLauncher, BrowserSession, WebDriverLauncher};
pub use bulk_send::BulkSendTool;
pub use send_email::{EmailGuard, SendEmailTool};
pub use time_parse::TimeParseTool;
pub use vault::{Vault, VaultError, VaultTool};
pub use web_automate::WebAutomateTool;

use std::path::PathBuf;
use std::sync::Arc;

use errand_core::policy::Policy;
use errand_notify::{Mailer, TemplateCatalog};
use errand_scheduler::JobStore;

use crate::registry::ToolRegistry;

/// Everything the built-in tools need from the host process.
#[derive(Clone)]
pub struct ToolDeps {
    pub policy: Policy,
    pub store: Arc<JobStore>,
    pub vault: Arc<Vault>,
    pub mailer: Arc<dyn Mailer>,
    pub catalog: Arc<TemplateCatalog>,
    pub browser: Arc<dyn BrowserLauncher>,
    pub artifacts_dir: PathBuf,
}

/// Register every built-in tool. Both mail tools share one [`EmailGuard`],
/// so the per-minute budget covers single and bulk sends together.
pub fn build_tools(deps: ToolDeps) -> ToolRegistry {
    let guard = Arc::new(EmailGuard::new(deps.policy.email.clone()));

    let mut registry = ToolRegistry::new();
    registry.register(TimeParseTool);
    registry.register(ScheduleAlarmTool::new(deps.store.clone()));
    registry.register(ListAlarmsTool::new(deps.store));
    registry.register(VaultTool::new(deps.vault.clone()));
    registry.register(WebAutomateTool::new(deps.browser, deps.vault, deps.artifacts_dir));
    registry.register(SendEmailTool::new(deps.mailer.clone(), guard.clone()));
    registry.register(BulkSendTool::new(deps.mailer, guard, deps.catalog));
    registry
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! In-memory mailer for tests.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use errand_notify::{MailError, Mailer, OutgoingEmail, SendReceipt};

    /// Records every message instead of delivering it.
    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail_with: Option<String>,
    }

    impl RecordingMailer {
        /// A mailer whose every send fails with an SMTP error carrying `message`.
        pub fn failing(message: &str) -> Self {
            Self {
                sent: Mutex::default(),
                fail_with: Some(message.to_string()),
            }
        }

        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
            if let Some(message) = &self.fail_with {
                return Err(MailError::Smtp(message.clone()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(email.clone());
            Ok(SendReceipt {
                message_id: format!("<{}@recording.test>", sent.len()),
                accepted: email.to.clone(),
                rejected: Vec::new(),
                response: "250 OK".to_string(),
            })
        }

        fn transport_name(&self) -> &str {
            "recording"
        }
    }
}
