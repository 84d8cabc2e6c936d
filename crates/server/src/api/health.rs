//! Liveness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Whether `/agent/run` has a model behind it.
    pub agent_ready: bool,
    pub tools: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        agent_ready: state.controller.is_some(),
        tools: state.registry.len(),
    })
}

pub async fn agent_ping() -> Json<Value> {
    Json(json!({ "ok": true, "route": "agent" }))
}
