//! HTTP endpoint modules.
//!
//! Each sub-module owns a single responsibility area.
//! Shared types live here in mod.rs.

mod agent;
mod alarms;
mod health;


use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

// ── Re-exports ───────────────────────────────────────────────────

pub use agent::{agent_run, agent_tool, agent_tools, templates_get, templates_list};
pub use alarms::{alarms_list, events};
pub use health::{agent_ping, health};
