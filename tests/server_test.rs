// tests/server_test.rs
// Handler-level checks: the router wired to an in-memory database and a
// single-script model, driven with tower's oneshot.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::util::ServiceExt;

use sibyl::agent::Workflow;
use sibyl::db::Database;
use sibyl::llm::{LlmError, TextModel};
use sibyl::schema::SchemaProvider;
use sibyl::server::{create_router, AppState};
use sqlx::sqlite::SqlitePoolOptions;

/// Answers the classifier with a fixed simple/aggregation verdict and every
/// generation prompt with a count over Track; everything else errors, which
/// the advisory stages absorb.
struct OneTrickModel;

#[async_trait]
impl TextModel for OneTrickModel {
    fn name(&self) -> &'static str {
        "one-trick"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.contains("Analyze the user question") {
            Ok(r#"{"intent": "aggregation", "complexity": "simple", "entities": [], "ambiguity": []}"#
                .to_string())
        } else if prompt.contains("SQL expert for SQLite") {
            Ok("SELECT COUNT(*) AS TrackCount FROM Track".to_string())
        } else if prompt.contains("Summarize the SQL results") {
            Ok("There are 3 tracks.".to_string())
        } else {
            Err(LlmError::Malformed("unscripted".to_string()))
        }
    }
}

async fn test_state() -> AppState {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::query("CREATE TABLE Track (TrackId INTEGER PRIMARY KEY, Name TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO Track (Name) VALUES ('a'), ('b'), ('c')")
        .execute(&pool)
        .await
        .unwrap();

    let db = Database::new(pool, 1000);
    let schema = Arc::new(SchemaProvider::load(db.clone()).await.unwrap());
    let model: Arc<dyn TextModel> = Arc::new(OneTrickModel);
    AppState {
        workflow: Arc::new(Workflow::new(model.clone(), db, schema.clone())),
        schema,
        model_name: model.name(),
    }
}

#[tokio::test]
async fn status_reports_ok() {
    let app = create_router(test_state().await);
    let response = app
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["tables"], 1);
}

#[tokio::test]
async fn query_endpoint_returns_final_result_object() {
    let app = create_router(test_state().await);
    let request = Request::post("/api/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({"question": "How many tracks are there?"}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["natural_answer"], "There are 3 tracks.");
    assert_eq!(json["result"]["columns"][0], "TrackCount");
    assert_eq!(json["result"]["rows"][0][0], 3);
    assert!(json["steps"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn schema_endpoint_dumps_structured_schema() {
    let app = create_router(test_state().await);
    let response = app
        .oneshot(Request::get("/api/schema").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["Track"][0]["name"], "TrackId");
    assert_eq!(json["Track"][0]["type"], "INTEGER");
}

#[tokio::test]
async fn stream_endpoint_emits_step_and_done_events() {
    let app = create_router(test_state().await);
    let request = Request::post("/api/query/stream")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({"question": "How many tracks are there?"}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains(r#""type":"step""#));
    assert!(text.contains(r#""stage":"understand""#));
    assert!(text.contains(r#""type":"done""#));
}
