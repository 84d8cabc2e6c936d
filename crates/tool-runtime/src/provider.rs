use crate::conversation::{AssistantContent, ConversationMessage};
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether the model may call tools on this turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
}

/// One chat-completion request with tools available.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Overrides the provider's configured model.
    pub model: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for LLM providers that support tool use.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the agent), not the provider.
/// Implementations live in crates/llm.
#[async_trait]
pub trait ToolAwareLlmProvider: Send + Sync {
    /// Run one model turn and return the assistant message verbatim.
    async fn complete_with_tools(
        &self,
        request: CompletionRequest,
    ) -> Result<AssistantContent, LlmError>;

    /// Provider name for logging/debugging (e.g., "openai", "ollama")
    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    AuthError,
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Mock LLM provider for testing the agent loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::tool::ToolCall;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Reply {
        Message(AssistantContent),
        Failure(String),
    }

    /// A mock provider that returns pre-configured replies in FIFO order
    /// and records every request it receives.
    pub struct MockLlmProvider {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<CompletionRequest>>,
        latency: Mutex<Duration>,
    }

    impl MockLlmProvider {
        pub fn new() -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                latency: Mutex::new(Duration::ZERO),
            }
        }

        /// Queue an assistant message for the next unanswered call.
        pub fn queue_reply(&self, content: AssistantContent) {
            self.replies.lock().unwrap().push_back(Reply::Message(content));
        }

        pub fn queue_text(&self, text: &str) {
            self.queue_reply(AssistantContent::text(text));
        }

        /// Queue a reply with no text and no tool calls.
        pub fn queue_empty(&self) {
            self.queue_reply(AssistantContent::default());
        }

        /// Queue a reply requesting `(id, tool, raw_arguments)` calls.
        pub fn queue_tool_calls(&self, calls: &[(&str, &str, &str)]) {
            self.queue_reply(AssistantContent::tool_calls(to_calls(calls)));
        }

        /// Queue a reply carrying prose alongside tool calls.
        pub fn queue_text_with_tool_calls(&self, text: &str, calls: &[(&str, &str, &str)]) {
            self.queue_reply(AssistantContent {
                text: Some(text.to_string()),
                tool_calls: to_calls(calls),
            });
        }

        /// Queue a transport failure.
        pub fn queue_error(&self, message: &str) {
            self.replies
                .lock()
                .unwrap()
                .push_back(Reply::Failure(message.to_string()));
        }

        /// Simulated time spent on every call.
        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock().unwrap() = latency;
        }

        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn to_calls(calls: &[(&str, &str, &str)]) -> Vec<ToolCall> {
        calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect()
    }

    impl Default for MockLlmProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ToolAwareLlmProvider for MockLlmProvider {
        async fn complete_with_tools(
            &self,
            request: CompletionRequest,
        ) -> Result<AssistantContent, LlmError> {
            self.requests.lock().unwrap().push(request);
            let latency = *self.latency.lock().unwrap();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Message(content)) => Ok(content),
                Some(Reply::Failure(message)) => Err(LlmError::NetworkError(message)),
                None => Ok(AssistantContent::default()),
            }
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
