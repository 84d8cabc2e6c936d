//! Scheduled alarms and the live alarm event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::state::AppState;

pub async fn alarms_list(State(state): State<Arc<AppState>>) -> Json<Value> {
    let items = state.store.list(true).await;
    Json(json!({ "ok": true, "items": items }))
}

/// Every fired alarm as an SSE `alarm` event. Subscribers that fall behind
/// the bus capacity skip the missed events.
pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|received| {
        let alarm = match received {
            Ok(alarm) => alarm,
            Err(e) => {
                tracing::warn!(error = %e, "alarm subscriber lagged");
                return None;
            }
        };
        let data = serde_json::to_string(&alarm).unwrap_or_else(|_| "{}".to_string());
        Some(Ok(Event::default().event("alarm").data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
