use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("Unknown LLM provider: {0} (expected \"openai\" or \"ollama\")")]
    UnknownProvider(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
