//! End-to-end HTTP surface tests: drive the Axum router in-process with
//! `tower::ServiceExt::oneshot`, no socket bound.
#![cfg(feature = "http")]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use recall::config::ExtractionMode;
use recall::{http::router, Config, Engine};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_engine(dir: &std::path::Path) -> Engine {
    let mut cfg = Config::default();
    cfg.data_root = dir.to_path_buf();
    cfg.extraction_mode = ExtractionMode::Rules;
    Engine::open(cfg).await.unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn add_then_get_round_trips_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_engine(dir.path()).await);

    let add_request = Request::builder()
        .method("POST")
        .uri("/v1/memories")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "content": "DeepSeek shipped a new release",
                "scope": {"user_id": "http-user"},
                "source": "github",
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(add_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let added = json_body(response).await;
    let id = added["id"].as_str().unwrap().to_string();
    assert!(added["success"].as_bool().unwrap());

    let get_request = Request::builder()
        .uri(format!("/v1/memories/{id}?user_id=http-user"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(get_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched["content"], "DeepSeek shipped a new release");
}

#[tokio::test]
async fn get_missing_item_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_engine(dir.path()).await);

    let request = Request::builder()
        .uri("/v1/memories/does-not-exist?user_id=http-user")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_over_http_finds_seeded_item() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_engine(dir.path()).await);

    let add_request = Request::builder()
        .method("POST")
        .uri("/v1/memories")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"content": "the quarterly roadmap review", "scope": {"user_id": "search-user"}}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(add_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let search_request = Request::builder()
        .method("POST")
        .uri("/v1/memories/search")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"query": "roadmap", "scope": {"user_id": "search-user"}, "top_k": 5}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(search_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let results = body["results"].as_array().unwrap();
    assert!(results.iter().any(|r| r["content"] == "the quarterly roadmap review"));
}

#[tokio::test]
async fn clear_without_confirm_on_default_scope_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_engine(dir.path()).await);

    let request = Request::builder()
        .method("DELETE")
        .uri("/v1/memories")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_and_stats_endpoints_respond() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_engine(dir.path()).await);

    let health_request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(health_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats_request = Request::builder().uri("/v1/stats").body(Body::empty()).unwrap();
    let response = app.oneshot(stats_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = json_body(response).await;
    assert_eq!(stats["total_turns"], 0);
}
