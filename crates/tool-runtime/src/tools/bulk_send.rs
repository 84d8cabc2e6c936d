use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use errand_notify::{Mailer, OutgoingEmail, TemplateCatalog, TemplateRenderer};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::send_email::EmailGuard;
use crate::schema::{is_email, Violation};
use crate::tool::{Tool, ToolError, ToolInput, ToolOutcome};

fn default_throttle_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TemplateRecipient {
    pub to: String,
    /// Merge fields for this recipient, layered over the shared params.
    pub params: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendInput {
    #[schemars(length(min = 1))]
    pub template_id: String,
    /// Flat list of addresses sharing the same params.
    pub to: Option<Vec<String>>,
    /// Addresses with per-recipient params. Takes precedence over `to`.
    pub recipients: Option<Vec<TemplateRecipient>>,
    /// Merge fields applied to every recipient.
    pub params: Option<Map<String, Value>>,
    /// Pause between sends.
    #[serde(default = "default_throttle_ms")]
    #[schemars(range(min = 0, max = 10000))]
    pub throttle_ms: u64,
}

impl ToolInput for BulkSendInput {
    fn check(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (i, address) in self.to.iter().flatten().enumerate() {
            if !is_email(address) {
                violations.push(Violation::at(format!("to.{i}"), "invalid email address"));
            }
        }
        for (i, recipient) in self.recipients.iter().flatten().enumerate() {
            if !is_email(&recipient.to) {
                violations.push(Violation::at(format!("recipients.{i}.to"), "invalid email address"));
            }
        }
        violations
    }
}

impl BulkSendInput {
    /// `(address, merged params)` per recipient; `recipients` wins over `to`.
    fn expand(&self) -> Vec<(String, Value)> {
        let shared = self.params.clone().unwrap_or_default();
        if let Some(recipients) = self.recipients.as_ref().filter(|r| !r.is_empty()) {
            return recipients
                .iter()
                .map(|r| {
                    let mut params = shared.clone();
                    params.extend(r.params.clone().unwrap_or_default());
                    (r.to.clone(), Value::Object(params))
                })
                .collect();
        }
        self.to
            .iter()
            .flatten()
            .map(|to| (to.clone(), Value::Object(shared.clone())))
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct DeliveryResult {
    to: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accepted: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DeliveryResult {
    fn failed(to: String, error: String) -> Self {
        Self {
            to,
            ok: false,
            message_id: None,
            accepted: None,
            error: Some(error),
        }
    }
}

/// Sends one catalog template to many recipients, one message each.
pub struct BulkSendTool {
    mailer: Arc<dyn Mailer>,
    guard: Arc<EmailGuard>,
    catalog: Arc<TemplateCatalog>,
    renderer: TemplateRenderer,
}

impl BulkSendTool {
    pub fn new(mailer: Arc<dyn Mailer>, guard: Arc<EmailGuard>, catalog: Arc<TemplateCatalog>) -> Self {
        Self {
            mailer,
            guard,
            catalog,
            renderer: TemplateRenderer::new(),
        }
    }
}

#[async_trait]
impl Tool for BulkSendTool {
    type Input = BulkSendInput;

    fn name(&self) -> &str {
        "send_bulk_template"
    }

    fn description(&self) -> &str {
        "Send a chosen template to many recipients (per-recipient merge fields supported)."
    }

    async fn execute(&self, input: BulkSendInput) -> Result<ToolOutcome, ToolError> {
        let Some(template) = self.catalog.get(&input.template_id) else {
            return Ok(ToolOutcome::failure_with("unknown_template", input.template_id));
        };
        let list = input.expand();
        if list.is_empty() {
            return Ok(ToolOutcome::failure_with(
                "missing_recipients",
                "Provide 'to' (array) or 'recipients' (array of {to, params}).",
            ));
        }

        let throttle = Duration::from_millis(input.throttle_ms);
        let mut results = Vec::with_capacity(list.len());
        for (i, (to, params)) in list.into_iter().enumerate() {
            if i > 0 && !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }

            if let Err(outcome) = self.guard.admit([&to]) {
                let code = outcome.error_code().unwrap_or("rejected").to_string();
                results.push(DeliveryResult::failed(to, code));
                continue;
            }

            let rendered = match self.renderer.render_template(template, &params) {
                Ok(rendered) => rendered,
                Err(e) => {
                    results.push(DeliveryResult::failed(to, e.to_string()));
                    continue;
                }
            };
            let email = OutgoingEmail {
                to: vec![to.clone()],
                subject: rendered.subject,
                html: Some(rendered.html).filter(|s| !s.is_empty()),
                text: Some(rendered.text).filter(|s| !s.is_empty()),
                ..OutgoingEmail::default()
            };

            match self.mailer.send(&email).await {
                Ok(receipt) => results.push(DeliveryResult {
                    to,
                    ok: true,
                    message_id: Some(receipt.message_id),
                    accepted: Some(receipt.accepted),
                    error: None,
                }),
                Err(e) => {
                    warn!(to = %to, error = %e, "templated send failed");
                    results.push(DeliveryResult::failed(to, e.to_string()));
                }
            }
        }

        let sent = results.iter().filter(|r| r.ok).count();
        let failed = results.len() - sent;
        info!(template = %template.id, sent, failed, "bulk send finished");
        Ok(ToolOutcome::ok(json!({
            "ok": failed == 0,
            "sent": sent,
            "failed": failed,
            "results": results,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::RecordingMailer;
    use errand_core::policy::EmailPolicy;

    fn tool(mailer: Arc<RecordingMailer>, allow: &[&str]) -> BulkSendTool {
        let guard = EmailGuard::new(EmailPolicy {
            allow_domains: allow.iter().map(|d| d.to_string()).collect(),
            max_per_minute: 60,
        });
        BulkSendTool::new(mailer, Arc::new(guard), Arc::new(TemplateCatalog::builtin()))
    }

    fn parse(args: Value) -> BulkSendInput {
        serde_json::from_value(args).unwrap()
    }

    #[test]
    fn recipients_take_precedence_and_merge_params() {
        let input = parse(json!({
            "templateId": "Template1",
            "to": ["ignored@x.com"],
            "params": {"name": "Team", "sender": "Ops"},
            "recipients": [{"to": "a@x.com", "params": {"name": "Asha"}}, {"to": "b@x.com"}]
        }));
        assert_eq!(input.throttle_ms, 250);
        let list = input.expand();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], ("a@x.com".to_string(), json!({"name": "Asha", "sender": "Ops"})));
        assert_eq!(list[1], ("b@x.com".to_string(), json!({"name": "Team", "sender": "Ops"})));
    }

    #[test]
    fn invalid_addresses_are_reported_by_path() {
        let input = parse(json!({
            "templateId": "Template1",
            "to": ["fine@x.com", "broken"],
            "recipients": [{"to": "also broken"}]
        }));
        let rendered: Vec<String> = input.check().iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["to.1: invalid email address", "recipients.0.to: invalid email address"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn renders_per_recipient_and_throttles() {
        let mailer = Arc::new(RecordingMailer::default());
        let started = tokio::time::Instant::now();
        let outcome = tool(mailer.clone(), &[])
            .execute(parse(json!({
                "templateId": "Template1",
                "recipients": [
                    {"to": "a@x.com", "params": {"name": "Asha"}},
                    {"to": "b@x.com"},
                    {"to": "c@x.com"}
                ],
                "throttleMs": 1000
            })))
            .await
            .unwrap();

        let value = outcome.to_value();
        assert_eq!(value["ok"], true);
        assert_eq!(value["sent"], 3);
        assert_eq!(value["failed"], 0);
        assert_eq!(started.elapsed(), Duration::from_secs(2));

        let sent = mailer.sent();
        assert_eq!(sent[0].subject, "Hi Asha! 👋");
        assert_eq!(sent[1].subject, "Hi there! 👋");
        assert_eq!(sent[2].to, vec!["c@x.com".to_string()]);
    }

    #[tokio::test]
    async fn per_recipient_failures_are_counted() {
        let mailer = Arc::new(RecordingMailer::default());
        let outcome = tool(mailer.clone(), &["x.com"])
            .execute(parse(json!({
                "templateId": "Template2",
                "to": ["a@x.com", "b@other.org"],
                "throttleMs": 0
            })))
            .await
            .unwrap();

        let value = outcome.to_value();
        assert_eq!(value["ok"], false);
        assert_eq!(value["sent"], 1);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["results"][1], json!({"to": "b@other.org", "ok": false, "error": "invalid_domain"}));
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn unknown_template_and_missing_recipients() {
        let mailer = Arc::new(RecordingMailer::default());
        let tool = tool(mailer, &[]);

        let outcome = tool
            .execute(parse(json!({"templateId": "Nope", "to": ["a@x.com"]})))
            .await
            .unwrap();
        assert_eq!(outcome.error_code(), Some("unknown_template"));

        let outcome = tool
            .execute(parse(json!({"templateId": "Template3", "recipients": []})))
            .await
            .unwrap();
        assert_eq!(outcome.error_code(), Some("missing_recipients"));
    }
}
