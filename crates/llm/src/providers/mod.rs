pub mod openai;

use std::sync::Arc;

use errand_core::config::LlmConfig;
use errand_tool_runtime::{LlmError, ToolAwareLlmProvider};

pub use openai::OpenAiToolProvider;

/// Create the tool-capable provider selected by config.
pub fn create_provider(llm_config: &LlmConfig) -> Result<Arc<dyn ToolAwareLlmProvider>, LlmError> {
    match llm_config.provider.as_str() {
        "openai" => {
            let api_key = llm_config
                .openai_api_key
                .as_ref()
                .ok_or_else(|| LlmError::NotConfigured("OPENAI_API_KEY not set".into()))?;
            let base_url = llm_config
                .openai_base_url
                .as_deref()
                .unwrap_or("https://api.openai.com");
            Ok(Arc::new(OpenAiToolProvider::new(
                api_key.clone(),
                llm_config.openai_model.clone(),
                base_url.to_string(),
            )))
        }
        "ollama" => Ok(Arc::new(OpenAiToolProvider::ollama(
            llm_config.ollama_url.clone(),
            llm_config.ollama_model.clone(),
        ))),
        other => Err(LlmError::NotConfigured(format!(
            "unknown LLM provider: '{}'",
            other
        ))),
    }
}
