//! OpenAI-compatible chat-completions implementation of [`ToolAwareLlmProvider`].
//!
//! Also serves Ollama, which exposes the same `/v1/chat/completions`
//! endpoint without authentication.

mod translate;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use errand_tool_runtime::{AssistantContent, CompletionRequest, LlmError, ToolAwareLlmProvider};

use self::translate::{message_to_openai, parse_completion, tool_choice_to_openai, tool_definition_to_openai};

/// One non-streaming chat-completion call per model turn.
pub struct OpenAiToolProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    name: &'static str,
}

impl OpenAiToolProvider {
    /// Create a provider for the OpenAI API (or any compatible server).
    ///
    /// # Arguments
    /// * `api_key` - Bearer token
    /// * `model` - Model name (e.g. `"gpt-4o-mini"`)
    /// * `base_url` - API base URL without the `/v1` suffix
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            name: "openai",
        }
    }

    /// A local Ollama server through its OpenAI-compatible endpoint.
    pub fn ollama(url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            model,
            base_url: url.trim_end_matches('/').to_string(),
            name: "ollama",
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(tool_definition_to_openai).collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!(tool_choice_to_openai(request.tool_choice));
        }
        body
    }
}

#[async_trait]
impl ToolAwareLlmProvider for OpenAiToolProvider {
    async fn complete_with_tools(&self, request: CompletionRequest) -> Result<AssistantContent, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(
            provider = self.name,
            url = %url,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completion request"
        );

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body_text = response.text().await.unwrap_or_default();
            if status == 401 {
                return Err(LlmError::AuthError);
            }
            if status == 429 {
                let retry_after = serde_json::from_str::<Value>(&body_text)
                    .ok()
                    .and_then(|v| v["error"]["retry_after_secs"].as_u64())
                    .unwrap_or(30);
                return Err(LlmError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
            return Err(LlmError::ApiError {
                status,
                message: body_text,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parse_completion(&payload)
    }

    fn provider_name(&self) -> &str {
        self.name
    }
}
