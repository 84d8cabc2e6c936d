use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::browser::{BrowserError, BrowserLauncher, BrowserSession};
use super::vault::Vault;
use crate::tool::{Tool, ToolError, ToolInput, ToolOutcome};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(15);
const ACTION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WAIT_MS: u64 = 15_000;

fn default_screenshot_path() -> String {
    "screenshot.png".to_string()
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(tag = "action")]
pub enum BrowserStep {
    /// Type a vault secret into a field.
    #[serde(rename = "type")]
    Type {
        selector: String,
        /// Reference of the form `vault.KEY`.
        value_ref: String,
        secret: Option<bool>,
    },
    #[serde(rename = "click")]
    Click { selector: String },
    #[serde(rename = "waitFor")]
    WaitFor {
        selector: String,
        #[serde(rename = "timeoutMs")]
        timeout_ms: Option<u64>,
    },
    #[serde(rename = "screenshot")]
    Screenshot {
        #[serde(default = "default_screenshot_path")]
        path: String,
    },
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebAutomateInput {
    #[schemars(url)]
    pub start_url: String,
    #[schemars(length(min = 1))]
    pub steps: Vec<BrowserStep>,
    /// Hostnames (and their subdomains) the session may start on.
    #[schemars(length(min = 1))]
    pub domain_allowlist: Vec<String>,
}

impl ToolInput for WebAutomateInput {}

/// Runs scripted browser steps against allowlisted sites, filling
/// fields from the vault without exposing the values.
pub struct WebAutomateTool {
    browser: Arc<dyn BrowserLauncher>,
    vault: Arc<Vault>,
    artifacts_dir: PathBuf,
}

impl WebAutomateTool {
    pub fn new(browser: Arc<dyn BrowserLauncher>, vault: Arc<Vault>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            browser,
            vault,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Resolve every `vault.KEY` reference before a browser is started.
    async fn resolve_secrets(&self, steps: &[BrowserStep]) -> Result<HashMap<String, String>, ToolOutcome> {
        let mut secrets = HashMap::new();
        for step in steps {
            let BrowserStep::Type { value_ref, .. } = step else {
                continue;
            };
            let key = match value_ref.split_once('.') {
                Some(("vault", key)) if !key.is_empty() => key,
                _ => return Err(ToolOutcome::failure_with("unsupported_value_ref", value_ref.clone())),
            };
            match self.vault.fetch_raw(key).await {
                Some(value) if !value.is_empty() => {
                    secrets.insert(value_ref.clone(), value);
                }
                _ => return Err(ToolOutcome::failure_with("missing_secret", key)),
            }
        }
        Ok(secrets)
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        input: &WebAutomateInput,
        secrets: &HashMap<String, String>,
    ) -> Result<(Vec<String>, Vec<String>), BrowserError> {
        let mut artifacts = Vec::new();
        let mut notes = Vec::new();

        session.goto(&input.start_url, NAVIGATION_TIMEOUT).await?;
        notes.push(format!("opened {}", input.start_url));

        for step in &input.steps {
            match step {
                BrowserStep::Type { selector, value_ref, .. } => {
                    let value = secrets.get(value_ref).map(String::as_str).unwrap_or_default();
                    session.fill(selector, value, ACTION_TIMEOUT).await?;
                    notes.push(format!("typed {value_ref} into {selector}"));
                }
                BrowserStep::Click { selector } => {
                    session.click(selector, ACTION_TIMEOUT).await?;
                    notes.push(format!("clicked {selector}"));
                }
                BrowserStep::WaitFor { selector, timeout_ms } => {
                    let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_WAIT_MS));
                    session.wait_for(selector, timeout).await?;
                }
                BrowserStep::Screenshot { path } => {
                    let png = session.screenshot().await?;
                    let target = self.artifact_path(path);
                    write_artifact(&target, &png)
                        .await
                        .map_err(|e| BrowserError::Driver(format!("saving {}: {e}", target.display())))?;
                    artifacts.push(target.display().to_string());
                }
            }
        }
        Ok((artifacts, notes))
    }

    /// Screenshots always land inside the artifacts directory.
    fn artifact_path(&self, requested: &str) -> PathBuf {
        let name = Path::new(requested)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| default_screenshot_path().into());
        self.artifacts_dir.join(name)
    }
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// Host equals an allowlisted domain or is a subdomain of one.
pub fn domain_allowed(start_url: &str, allowlist: &[String]) -> bool {
    let Ok(url) = url::Url::parse(start_url) else {
        return false;
    };
    let Some(host) = url.host_str().map(str::to_lowercase) else {
        return false;
    };
    allowlist.iter().any(|entry| {
        let domain = entry.trim().trim_start_matches('.').to_lowercase();
        !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
    })
}

fn classify(error: BrowserError) -> ToolOutcome {
    match error {
        BrowserError::Timeout { .. } => ToolOutcome::failure_with("selector_timeout", error.to_string()),
        BrowserError::Captcha { .. } => ToolOutcome::failure("captcha_detected"),
        BrowserError::AccessDenied(_) => ToolOutcome::failure("access_denied"),
        other => {
            let message = other.to_string();
            let lower = message.to_lowercase();
            if lower.contains("timeout") || lower.contains("timed out") {
                ToolOutcome::failure_with("selector_timeout", message)
            } else if lower.contains("captcha") {
                ToolOutcome::failure("captcha_detected")
            } else if lower.contains("denied") || lower.contains("forbidden") {
                ToolOutcome::failure("access_denied")
            } else {
                ToolOutcome::failure_with("automation_error", message)
            }
        }
    }
}

#[async_trait]
impl Tool for WebAutomateTool {
    type Input = WebAutomateInput;

    fn name(&self) -> &str {
        "web_automate"
    }

    fn description(&self) -> &str {
        "Headless browser steps with domain allowlist and secret injection via vault."
    }

    async fn execute(&self, input: WebAutomateInput) -> Result<ToolOutcome, ToolError> {
        if !domain_allowed(&input.start_url, &input.domain_allowlist) {
            warn!(url = %input.start_url, "start url is outside the allowlist");
            return Ok(ToolOutcome::failure("invalid_domain"));
        }
        let secrets = match self.resolve_secrets(&input.steps).await {
            Ok(secrets) => secrets,
            Err(outcome) => return Ok(outcome),
        };

        let mut session = match self.browser.launch().await {
            Ok(session) => session,
            Err(e) => return Ok(classify(e)),
        };
        let result = self.drive(session.as_mut(), &input, &secrets).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close browser session");
        }

        match result {
            Ok((artifacts, notes)) => {
                info!(url = %input.start_url, steps = input.steps.len(), "web automation finished");
                Ok(ToolOutcome::ok(json!({
                    "status": "ok",
                    "artifacts": artifacts,
                    "notes": notes,
                })))
            }
            Err(e) => Ok(classify(e)),
        }
    }
}
