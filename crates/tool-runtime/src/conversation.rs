use crate::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationMessage {
    /// Instructions framing the whole run
    System { content: String },
    /// The goal (or caller-supplied context)
    User { content: String },
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantContent),
    /// Result of a tool execution, paired to a call by id
    Tool(ToolResult),
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User { content: content.into() }
    }
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantContent {
    /// Text of the reply, if any
    pub text: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }

    /// Trimmed text, or `None` when absent or blank.
    pub fn final_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_serialize_with_role_tag() {
        let msg = ConversationMessage::user("Remind me at 7pm");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "user", "content": "Remind me at 7pm"})
        );

        let msg = ConversationMessage::Tool(ToolResult {
            tool_call_id: "call_1".into(),
            name: "time_parse".into(),
            content: "{}".into(),
            is_error: false,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
    }

    #[test]
    fn final_text_ignores_blank_replies() {
        assert_eq!(AssistantContent::text("  done \n").final_text(), Some("done"));
        assert_eq!(AssistantContent::text("   ").final_text(), None);
        assert_eq!(AssistantContent::default().final_text(), None);
    }
}
