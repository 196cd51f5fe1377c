//! Integration tests for the restarter API endpoints

#[path = "../src/api.rs"]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use restarter_lib::{
    health::{components, HealthRegistry},
    observability::RestarterMetrics,
    reconciler::CycleInfo,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::CONTROLLER).await;

    let metrics = RestarterMetrics::new().unwrap();
    let state = Arc::new(AppState::new(health_registry, metrics));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(router: Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_healthz_ok_when_healthy() {
    let (router, _state) = setup_test_app().await;

    let (status, body) = get(router, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_healthz_not_ok_after_failed_cycle() {
    let (router, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::CONTROLLER, "failed to get deployments")
        .await;

    let (status, body) = get(router, "/healthz").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "not ok");
}

#[tokio::test]
async fn test_ready_not_ok_before_start() {
    let (router, _state) = setup_test_app().await;

    let (status, body) = get(router, "/ready").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "not ok");
}

#[tokio::test]
async fn test_ready_ok_once_started() {
    let (router, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(router, "/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_ready_requires_health() {
    let (router, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;
    state
        .health_registry
        .set_health(components::CONTROLLER, false)
        .await;

    let (status, _) = get(router, "/ready").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (router, state) = setup_test_app().await;
    state.metrics.record_cycle(
        &CycleInfo {
            excluded: 4,
            skipped: 7,
            restarted: 2,
            failed: 1,
        },
        Duration::from_millis(250),
    );

    let (status, body) = get(router, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("k8s_restarter_restarts 2"));
    assert!(body.contains("k8s_restarter_ignores 4"));
    assert!(body.contains("k8s_restarter_skips 7"));
    assert!(body.contains("k8s_restarter_failures 1"));
    assert!(body.contains("k8s_restarter_restarts_histo_bucket"));
    assert!(body.contains("k8s_restarter_cycle_duration_seconds"));
}

#[tokio::test]
async fn test_unknown_route() {
    let (router, _state) = setup_test_app().await;

    let (status, _) = get(router, "/readyz").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bind_fails_when_port_taken() {
    let first = api::bind(0).await.unwrap();
    let port = first.local_addr().unwrap().port();

    assert!(api::bind(port).await.is_err());
}

#[tokio::test]
async fn test_serve_answers_on_bound_listener() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (_router, state) = setup_test_app().await;
    let listener = api::bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(api::serve(listener, state));

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("ok"));
    server.abort();
}
