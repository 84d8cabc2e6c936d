use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;

use crate::schema::Violation;

/// Describes a tool's interface for LLM consumption.
/// Maps to OpenAI's function format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "time_parse", "send_email")
    pub name: String,
    /// Human-readable description for the LLM
    pub description: String,
    /// Fully inlined JSON Schema (root is an object with properties)
    pub input_schema: Value,
}

/// Represents an LLM requesting execution of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this invocation (used to pair the result)
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// Raw JSON-encoded arguments exactly as the model produced them
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Decoded arguments. Malformed or empty JSON decodes to `{}`.
    pub fn parsed_arguments(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| json!({}))
    }
}

/// Result of executing a tool, sent back to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCall id
    pub tool_call_id: String,
    /// Name of the tool that produced it
    pub name: String,
    /// Serialized (possibly truncated) outcome
    pub content: String,
    /// Whether this result represents an error
    pub is_error: bool,
}

/// A recognized, non-exceptional tool failure (`invalid_domain`, `past_time`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.code, detail),
            None => f.write_str(&self.code),
        }
    }
}

/// What a tool hands back: a value, or a failure code the model can act on.
///
/// On the wire a failure is `{"error": code}` (plus `"detail"` when present),
/// so the model sees one convention for every tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Ok(Value),
    Err(ToolFailure),
}

impl ToolOutcome {
    pub fn ok(value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::failure_with("serialization_error", e.to_string()),
        }
    }

    pub fn failure(code: impl Into<String>) -> Self {
        Self::Err(ToolFailure {
            code: code.into(),
            detail: None,
        })
    }

    pub fn failure_with(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Err(ToolFailure {
            code: code.into(),
            detail: Some(detail.into()),
        })
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Err(f) => Some(&f.code),
            Self::Ok(_) => None,
        }
    }

    /// The JSON the model (and HTTP callers) see.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Ok(v) => v.clone(),
            Self::Err(f) => {
                let mut obj = json!({ "error": f.code });
                if let Some(detail) = &f.detail {
                    obj["detail"] = Value::String(detail.clone());
                }
                obj
            }
        }
    }
}

impl Serialize for ToolOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Typed tool arguments.
///
/// The JSON schema comes from [`JsonSchema`]; defaults and coercions come
/// from the `Deserialize` impl. `check` adds refinements the schema cannot
/// express (cross-field rules, normalized-value checks).
pub trait ToolInput: DeserializeOwned + JsonSchema + Send + 'static {
    fn check(&self) -> Vec<Violation> {
        Vec::new()
    }
}

/// The primary extension point: all tools implement this trait.
///
/// Input arrives already validated and decoded.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Input: ToolInput;

    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    async fn execute(&self, input: Self::Input) -> Result<ToolOutcome, ToolError>;
}

/// An unexpected handler failure (as opposed to a [`ToolFailure`] code).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}
