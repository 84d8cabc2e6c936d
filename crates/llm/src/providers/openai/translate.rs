//! Translation between provider-agnostic conversation types and the
//! OpenAI chat-completions format.

use serde_json::{json, Value};

use errand_tool_runtime::{AssistantContent, ConversationMessage, LlmError, ToolCall, ToolChoice, ToolDefinition};

/// Translate a [`ToolDefinition`] into the OpenAI function-tool format.
pub(super) fn tool_definition_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        },
    })
}

pub(super) fn tool_choice_to_openai(choice: ToolChoice) -> &'static str {
    match choice {
        ToolChoice::Auto => "auto",
        ToolChoice::None => "none",
    }
}

/// Translate a [`ConversationMessage`] into an OpenAI message object.
pub(super) fn message_to_openai(msg: &ConversationMessage) -> Value {
    match msg {
        ConversationMessage::System { content } => json!({
            "role": "system",
            "content": content,
        }),
        ConversationMessage::User { content } => json!({
            "role": "user",
            "content": content,
        }),
        ConversationMessage::Assistant(content) => {
            let mut out = json!({
                "role": "assistant",
                "content": content.text,
            });
            if !content.tool_calls.is_empty() {
                let calls: Vec<Value> = content
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments },
                        })
                    })
                    .collect();
                out["tool_calls"] = Value::Array(calls);
            }
            out
        }
        ConversationMessage::Tool(result) => json!({
            "role": "tool",
            "name": result.name,
            "tool_call_id": result.tool_call_id,
            "content": result.content,
        }),
    }
}

/// Pull the assistant message out of a chat-completions response body.
///
/// Arguments are kept as the raw string the model produced; some
/// OpenAI-compatible servers send an object instead, which is re-encoded.
pub(super) fn parse_completion(body: &Value) -> Result<AssistantContent, LlmError> {
    let message = body["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .filter(|m| m.is_object())
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message".into()))?;

    let text = message["content"].as_str().map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for (i, call) in calls.iter().enumerate() {
            let function = &call["function"];
            let name = function["name"]
                .as_str()
                .ok_or_else(|| LlmError::InvalidResponse(format!("tool_calls[{i}] has no function name")))?;
            let id = call["id"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{i}"));
            let arguments = match &function["arguments"] {
                Value::String(raw) => raw.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            tool_calls.push(ToolCall::new(id, name, arguments));
        }
    }

    Ok(AssistantContent { text, tool_calls })
}
