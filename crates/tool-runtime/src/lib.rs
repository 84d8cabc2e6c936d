//! Tool registry, LLM agent and controller loop.
//!
//! A [`ControllerLoop`] drives one goal to completion: it asks the
//! [`Agent`] for the next step, runs any requested tools through the
//! [`ToolRegistry`], and feeds the (truncated) results back until the model
//! answers or the [`errand_core::Policy`] budget runs out.

pub mod agent;
pub mod conversation;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod tool;
pub mod tools;

pub use agent::Agent;
pub use conversation::{AssistantContent, ConversationMessage};
pub use provider::{CompletionRequest, LlmError, ToolAwareLlmProvider, ToolChoice};
pub use registry::{CallError, ToolRegistry, ToolSpec};
pub use runtime::{ControllerLoop, RunError, RunResult, RunStatus, StepRecord};
pub use schema::{InputSchema, SchemaExportError, Violation};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolError, ToolFailure, ToolInput, ToolOutcome, ToolResult};
pub use tools::{build_tools, ToolDeps};
