//! Application wiring.
//!
//! Constructs the vault, mailer, job table, tool registry and controller
//! loop from `Config`.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use errand_core::config::SmtpConfig;
use errand_core::{Config, Policy};
use errand_notify::{MailError, Mailer, OutgoingEmail, SendReceipt, SmtpMailer, SmtpSettings, TemplateCatalog};
use errand_scheduler::{AlarmEvent, JobStore};
use errand_tool_runtime::tools::{Vault, WebDriverLauncher};
use errand_tool_runtime::{build_tools, Agent, ControllerLoop, ToolDeps, ToolRegistry};

use crate::prompt::SYSTEM_PROMPT;

/// Capacity of the alarm event bus; slow SSE subscribers lag past this.
const EVENT_BUS_CAPACITY: usize = 64;

/// Load configuration from `.env` and environment variables.
pub fn load_config() -> Config {
    errand_core::config::load_dotenv();
    Config::from_env()
}

/// Long-lived services shared by the HTTP API, the CLI and the job runner.
pub struct Services {
    pub registry: Arc<ToolRegistry>,
    /// `None` when no LLM provider is configured; tools still work.
    pub controller: Option<Arc<ControllerLoop>>,
    pub catalog: Arc<TemplateCatalog>,
    pub store: Arc<JobStore>,
    pub events: broadcast::Sender<AlarmEvent>,
}

pub async fn build_services(config: &Config) -> anyhow::Result<Services> {
    let policy = Policy::from_env();

    let vault = Arc::new(
        Vault::open(config.storage.vault_file(), &config.vault.master_key)
            .await
            .context("failed to open vault")?,
    );
    let store = Arc::new(
        JobStore::open(config.storage.jobs_file())
            .await
            .context("failed to open job table")?,
    );
    let mailer = build_mailer(&config.smtp, &vault).await;
    let catalog = Arc::new(TemplateCatalog::builtin());
    let browser = Arc::new(WebDriverLauncher::new(
        config.browser.webdriver_url.clone(),
        config.browser.headless,
    ));

    let registry = Arc::new(build_tools(ToolDeps {
        policy: policy.clone(),
        store: store.clone(),
        vault,
        mailer,
        catalog: catalog.clone(),
        browser,
        artifacts_dir: config.storage.artifacts_dir(),
    }));
    info!(tools = ?registry.names(), "tool registry ready");

    let controller = build_controller(config, registry.clone(), policy)?;
    let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

    Ok(Services {
        registry,
        controller,
        catalog,
        store,
        events,
    })
}

/// Build the controller loop. A missing or invalid provider configuration
/// disables the agent; a tool schema that cannot be exported is fatal.
pub fn build_controller(
    config: &Config,
    registry: Arc<ToolRegistry>,
    policy: Policy,
) -> anyhow::Result<Option<Arc<ControllerLoop>>> {
    if let Err(e) = config.validate() {
        warn!("LLM configuration rejected: {}; agent disabled", e);
        return Ok(None);
    }
    let provider = match errand_llm::create_provider(&config.llm) {
        Ok(p) => p,
        Err(e) => {
            warn!("Failed to create LLM provider: {}; agent disabled", e);
            return Ok(None);
        }
    };

    let agent = Agent::new(provider, registry, SYSTEM_PROMPT)
        .context("tool schemas could not be exported for the model")?
        .with_temperature(config.llm.temperature)
        .with_max_tokens(config.llm.max_tokens);

    info!(
        provider = agent.provider_name(),
        model = config.llm.model(),
        tools = agent.tools().len(),
        max_steps = policy.max_steps,
        "agent ready"
    );
    Ok(Some(Arc::new(ControllerLoop::new(Arc::new(agent), policy))))
}

/// SMTP credentials come from the vault first, then the environment.
async fn build_mailer(smtp: &SmtpConfig, vault: &Vault) -> Arc<dyn Mailer> {
    let Some(host) = smtp.host.clone() else {
        warn!("SMTP_HOST not set, email tools will fail until it is configured");
        return Arc::new(UnconfiguredMailer);
    };

    let username = match vault.fetch_raw("SMTP_USER").await {
        Some(user) => Some(user),
        None => smtp.username.clone(),
    };
    let password = match vault.fetch_raw("SMTP_PASS").await {
        Some(pass) => Some(pass),
        None => smtp.password.clone(),
    };
    if username.is_none() || password.is_none() {
        warn!("Missing SMTP credentials. Check env/vault.");
    }

    let settings = SmtpSettings {
        host,
        port: smtp.port,
        implicit_tls: smtp.implicit_tls(),
        username,
        password,
        from: smtp.from.clone(),
    };
    match SmtpMailer::from_config(&settings) {
        Ok(mailer) => {
            info!(host = %settings.host, port = settings.port, "SMTP mailer ready");
            Arc::new(mailer)
        }
        Err(e) => {
            warn!("SMTP mailer unavailable: {}", e);
            Arc::new(UnconfiguredMailer)
        }
    }
}

/// Stand-in when SMTP is not set up; every send reports the gap.
struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        Err(MailError::Config("SMTP is not configured (set SMTP_HOST)".to_string()))
    }

    fn transport_name(&self) -> &str {
        "unconfigured"
    }
}
