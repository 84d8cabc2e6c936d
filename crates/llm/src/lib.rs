//! LLM backends for the agent.
//!
//! Every provider implements [`errand_tool_runtime::ToolAwareLlmProvider`];
//! [`create_provider`] picks one from [`errand_core::config::LlmConfig`].

pub mod providers;

pub use providers::{create_provider, OpenAiToolProvider};
