use std::sync::Arc;

use errand_core::RoutingHints;
use tracing::debug;

use crate::conversation::{AssistantContent, ConversationMessage};
use crate::provider::{CompletionRequest, LlmError, ToolAwareLlmProvider, ToolChoice};
use crate::registry::ToolRegistry;
use crate::schema::SchemaExportError;
use crate::tool::ToolDefinition;

const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// One model persona: a provider, a system prompt and the tools it may call.
///
/// The agent is stateless between calls; the conversation is owned by the
/// caller and passed to [`Agent::step`] each turn.
pub struct Agent {
    provider: Arc<dyn ToolAwareLlmProvider>,
    registry: Arc<ToolRegistry>,
    tools: Vec<ToolDefinition>,
    system_prompt: String,
    model: Option<String>,
    temperature: f32,
    max_tokens: u32,
    tool_choice: ToolChoice,
}

impl Agent {
    /// Export the registry once. A tool whose schema cannot be exported
    /// makes the agent unusable, so this fails instead of skipping it.
    pub fn new(
        provider: Arc<dyn ToolAwareLlmProvider>,
        registry: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
    ) -> Result<Self, SchemaExportError> {
        let tools = registry.export_for_model()?;
        Ok(Self {
            provider,
            registry,
            tools,
            system_prompt: system_prompt.into(),
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            tool_choice: ToolChoice::Auto,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    /// `[System, User]` for a new run.
    ///
    /// The user message carries `context` when it is non-empty, otherwise the
    /// goal. Routing hints only add advisory lines to the system message.
    pub fn build_initial_messages(
        &self,
        goal: &str,
        context: Option<&str>,
        hints: RoutingHints,
    ) -> Vec<ConversationMessage> {
        let mut system = self.system_prompt.clone();
        if hints.prefer_time_parse {
            system.push_str(
                "\nHint: the goal mentions a time. Resolve it with time_parse before scheduling anything.",
            );
        }
        if hints.prefer_web {
            system.push_str(
                "\nHint: the goal mentions a website. Use web_automate only for allowlisted domains.",
            );
        }

        let user = match context {
            Some(ctx) if !ctx.trim().is_empty() => ctx,
            _ => goal,
        };

        vec![
            ConversationMessage::system(system),
            ConversationMessage::user(user),
        ]
    }

    /// One model turn over the full transcript. No retry: a transport or
    /// API failure is returned to the caller as-is.
    pub async fn step(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<AssistantContent, LlmError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(
            provider = self.provider.provider_name(),
            messages = messages.len(),
            tools = self.tools.len(),
            "requesting completion"
        );
        self.provider.complete_with_tools(request).await
    }
}
