// src/server/mod.rs
// HTTP surface over the agent:
// - GET  /api/status        - health check
// - POST /api/query         - run a question to completion
// - POST /api/query/stream  - SSE, one event per stage
// - GET  /api/schema        - structured schema dump

pub mod handlers;
pub mod types;

use anyhow::Result;
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::Workflow;
use crate::schema::SchemaProvider;

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<Workflow>,
    pub schema: Arc<SchemaProvider>,
    pub model_name: &'static str,
}

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(handlers::status_handler))
        .route("/api/query", post(handlers::query_handler))
        .route("/api/query/stream", post(handlers::query_stream_handler))
        .route("/api/schema", get(handlers::schema_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server until the process is stopped.
pub async fn run(host: &str, port: u16, state: AppState) -> Result<()> {
    let app = create_router(state);
    let bind_address = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("listening on {bind_address}");
    axum::serve(listener, app).await?;
    Ok(())
}
