//! Agent endpoints: run a goal, call a tool directly, browse templates.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use errand_notify::EmailTemplate;
use errand_tool_runtime::{RunResult, ToolDefinition, ToolOutcome};

use super::{api_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub args: Option<Value>,
}

/// Run the agent against a goal and return the full trace.
pub async fn agent_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResult>, ApiError> {
    let goal = req.goal.unwrap_or_default();
    if goal.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "goal is required"));
    }
    let Some(controller) = state.controller.as_ref() else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Agent is not configured (check LLM_PROVIDER and OPENAI_API_KEY)",
        ));
    };

    match controller.run(&goal, req.context.as_deref()).await {
        Ok(result) => {
            info!(status = ?result.status, steps = result.steps.len(), duration_ms = result.duration_ms, "agent run finished");
            Ok(Json(result))
        }
        Err(e) => {
            warn!(error = %e, "agent run failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Invoke one tool through the registry, bypassing the model.
///
/// Tool-level failures (`{"error": code}`) are ordinary 200 responses;
/// unknown tools, invalid arguments and handler errors are 400s.
pub async fn agent_tool(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToolRequest>,
) -> Result<Json<ToolOutcome>, ApiError> {
    state
        .registry
        .call(&req.name, req.args)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Model-facing tool definitions.
pub async fn agent_tools(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ToolDefinition>>, ApiError> {
    state
        .registry
        .export_for_model()
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn templates_list(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "templates": state.catalog.ids() }))
}

pub async fn templates_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EmailTemplate>, ApiError> {
    state
        .catalog
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Template not found"))
}
