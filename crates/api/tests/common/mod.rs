#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use courier_api::config::ServerConfig;
use courier_api::router::build_app_router;
use courier_api::state::AppState;
use courier_core::streams::StreamSettings;
use courier_events::{EventProducer, MemoryNotificationStore, MemoryStreamStore, RetryPolicy};

pub const STREAM: &str = "notifications";

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        streams: StreamSettings::default(),
    }
}

/// The full application router over in-memory stores.
///
/// Returns the stores so tests can inject faults and inspect what was
/// appended or recorded.
pub fn build_test_app() -> (Router, Arc<MemoryStreamStore>, Arc<MemoryNotificationStore>) {
    let config = test_config();
    let store = Arc::new(MemoryStreamStore::new());
    let records = Arc::new(MemoryNotificationStore::new());

    let producer = EventProducer::new(store.clone(), STREAM)
        .with_retry_policy(RetryPolicy::linear(2, Duration::from_millis(1)));

    let state = AppState {
        config: Arc::new(config.clone()),
        producer: Arc::new(producer),
        records: records.clone(),
    };

    (build_app_router(state, &config), store, records)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_raw(app, uri, body.to_string()).await
}

/// POST `body` verbatim with a JSON content type.
pub async fn post_raw(app: Router, uri: &str, body: impl Into<String>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
