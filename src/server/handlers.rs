// src/server/handlers.rs

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::mpsc;

use super::AppState;
use crate::server::types::{QueryRequest, QueryResponse};

/// Health check and status endpoint
pub async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "model": state.model_name,
        "tables": state.schema.table_names().len(),
        "schema_index": state.schema.has_index(),
        "ts": chrono::Utc::now().timestamp(),
    }))
}

/// Run one question to completion and return the final result object.
pub async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let session = state.workflow.run(request.question).await;
    Json(QueryResponse::from(session))
}

/// Stream one question as SSE: a `step` event per completed stage, then the
/// terminal result/visualization/answer/error events, then `done`.
pub async fn query_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::channel(32);

    let workflow = state.workflow.clone();
    tokio::spawn(async move {
        workflow.run_with_events(request.question, tx).await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(data));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Structured schema dump: `{table: [{name, type}, ...]}`.
pub async fn schema_handler(State(state): State<AppState>) -> Json<Value> {
    Json(state.schema.structured_schema())
}
