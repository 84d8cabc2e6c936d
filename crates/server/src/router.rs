//! HTTP router construction.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/agent/run", post(api::agent_run))
        .route("/agent/tool", post(api::agent_tool))
        .route("/agent/tools", get(api::agent_tools))
        .route("/agent/templates", get(api::templates_list))
        .route("/agent/templates/{id}", get(api::templates_get))
        .route("/agent/ping", get(api::agent_ping))
        .route("/alarms", get(api::alarms_list))
        .route("/events", get(api::events))
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!("Invalid CORS_ORIGIN '{}': {}; allowing any origin", origin, e);
            CorsLayer::permissive()
        }
    }
}
