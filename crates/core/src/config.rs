use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
pub(crate) fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

pub(crate) fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

pub(crate) fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Active profile name from `ERRAND_PROFILE`, upper-cased (empty = default).
pub fn active_profile() -> String {
    env_or("ERRAND_PROFILE", "").to_uppercase()
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub smtp: SmtpConfig,
    pub vault: VaultConfig,
    pub browser: BrowserConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `ERRAND_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        Self::for_profile(&active_profile())
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            llm: LlmConfig::from_env_profiled(p),
            smtp: SmtpConfig::from_env_profiled(p),
            vault: VaultConfig::from_env_profiled(p),
            browser: BrowserConfig::from_env_profiled(p),
        }
    }

    /// Reject configurations the agent cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.llm.provider.as_str() {
            "openai" if self.llm.openai_api_key.is_none() => {
                return Err(ConfigError::MissingSetting("OPENAI_API_KEY"));
            }
            "openai" | "ollama" => {}
            other => return Err(ConfigError::UnknownProvider(other.to_string())),
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid {
                key: "LLM_TEMPERATURE",
                message: format!("{} is outside 0.0..=2.0", self.llm.temperature),
            });
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!("  storage:  data_dir={}", self.storage.data_dir.display());
        tracing::info!("  llm:      provider={}, model={}", self.llm.provider, self.llm.model());
        tracing::info!(
            "  smtp:     host={}, port={}",
            self.smtp.host.as_deref().unwrap_or("(none)"),
            self.smtp.port
        );
        tracing::info!("  vault:    master_key_set={}", !self.vault.master_key.is_empty());
        tracing::info!("  browser:  webdriver={}", self.browser.webdriver_url);
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "storage": { "data_dir": self.storage.data_dir },
            "llm": {
                "provider": self.llm.provider,
                "model": self.llm.model(),
                "configured": self.llm.is_configured(),
            },
            "smtp": {
                "host": self.smtp.host,
                "port": self.smtp.port,
                "configured": self.smtp.is_configured(),
            },
            "browser": { "webdriver_url": self.browser.webdriver_url, "headless": self.browser.headless },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 5001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "http://localhost:5173"),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }

    /// JSON job table backing scheduled alarms.
    pub fn jobs_file(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    pub fn vault_file(&self) -> PathBuf {
        self.data_dir.join("vault.enc")
    }

    /// Directory where relative screenshot paths are resolved.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }
}

// ── LLM (OpenAI / Ollama) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" or "ollama"
    pub provider: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub ollama_url: String,
    pub ollama_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "LLM_PROVIDER", "openai"),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o-mini"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            ollama_url: profiled_env_or(p, "OLLAMA_URL", "http://localhost:11434"),
            ollama_model: profiled_env_or(p, "OLLAMA_MODEL", "llama3.1"),
            temperature: profiled_env_or(p, "LLM_TEMPERATURE", "0.2")
                .parse()
                .unwrap_or(0.2),
            max_tokens: profiled_env_u32(p, "LLM_MAX_TOKENS", 1024),
        }
    }

    /// Model identifier for the selected provider.
    pub fn model(&self) -> &str {
        match self.provider.as_str() {
            "ollama" => &self.ollama_model,
            _ => &self.openai_model,
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "openai" => self.openai_api_key.is_some(),
            "ollama" => true,
            _ => false,
        }
    }
}

// ── SMTP ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub from: Option<String>,
}

impl SmtpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_opt(p, "SMTP_HOST"),
            port: profiled_env_u16(p, "SMTP_PORT", 587),
            username: profiled_env_opt(p, "SMTP_USER"),
            password: profiled_env_opt(p, "SMTP_PASS"),
            from: profiled_env_opt(p, "FROM_EMAIL"),
        }
    }

    /// Implicit TLS on the SMTPS port, STARTTLS everywhere else.
    pub fn implicit_tls(&self) -> bool {
        self.port == 465
    }

    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }
}

// ── Vault ─────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Passphrase the vault key is derived from (may be empty).
    #[serde(skip_serializing, default)]
    pub master_key: String,
}

impl VaultConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            master_key: profiled_env_or(p, "VAULT_MASTER_KEY", ""),
        }
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

// ── Browser automation ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Base URL of a W3C WebDriver endpoint (chromedriver, geckodriver, ...).
    pub webdriver_url: String,
    pub headless: bool,
}

impl BrowserConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            webdriver_url: profiled_env_or(p, "WEBDRIVER_URL", "http://localhost:9515"),
            headless: profiled_env_bool(p, "BROWSER_HEADLESS", true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_prefixed_key_wins_over_plain_key() {
        env::set_var("CFGTESTA_PORT", "8088");
        let config = Config::for_profile("cfgtesta");
        assert_eq!(config.profile, "CFGTESTA");
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.profile_label(), "CFGTESTA");
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        env::set_var("CFGTESTB_SMTP_PORT", "not-a-port");
        let config = Config::for_profile("cfgtestb");
        assert_eq!(config.smtp.port, 587);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        env::set_var("CFGTESTC_BROWSER_HEADLESS", "off");
        assert!(!Config::for_profile("cfgtestc").browser.headless);
        env::set_var("CFGTESTD_BROWSER_HEADLESS", "YES");
        assert!(Config::for_profile("cfgtestd").browser.headless);
    }

    #[test]
    fn smtps_port_uses_implicit_tls() {
        let mut smtp = Config::for_profile("cfgteste").smtp;
        smtp.port = 465;
        assert!(smtp.implicit_tls());
        smtp.port = 587;
        assert!(!smtp.implicit_tls());
    }

    #[test]
    fn redacted_summary_hides_secrets() {
        env::set_var("CFGTESTF_SMTP_PASS", "hunter2");
        env::set_var("CFGTESTF_VAULT_MASTER_KEY", "topsecret");
        let config = Config::for_profile("cfgtestf");
        let summary = config.redacted_summary().to_string();
        assert!(!summary.contains("hunter2"));
        assert!(!summary.contains("topsecret"));
        assert!(!format!("{:?}", config.vault).contains("topsecret"));
    }

    #[test]
    fn validate_rejects_unknown_provider_and_missing_key() {
        let mut config = Config::for_profile("cfgtestg");
        config.llm.provider = "gemini".into();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownProvider(_))));

        config.llm.provider = "openai".into();
        config.llm.openai_api_key = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSetting("OPENAI_API_KEY"))
        ));

        config.llm.openai_api_key = Some("sk-test".into());
        assert!(config.validate().is_ok());

        config.llm.provider = "ollama".into();
        config.llm.temperature = 3.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn storage_paths_live_under_data_dir() {
        let storage = StorageConfig { data_dir: PathBuf::from("/srv/errand") };
        assert_eq!(storage.jobs_file(), PathBuf::from("/srv/errand/jobs.json"));
        assert_eq!(storage.vault_file(), PathBuf::from("/srv/errand/vault.enc"));
    }
}
