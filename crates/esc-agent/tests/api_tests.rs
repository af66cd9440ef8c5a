//! Integration tests for the agent API endpoints

#[path = "../src/api.rs"]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use esc_core::{
    health::components, EmptySource, EscConfig, EscMetrics, EscRuntime, HealthRegistry,
    SimulatedLedger, StatusResponse,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.set_healthy(components::LEDGER).await;

    let runtime = Arc::new(EscRuntime::new(EscMetrics::new(), health_registry));
    let state = Arc::new(AppState::new(runtime));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["ledger"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(
            &components::for_instance("traffic", components::HARVESTER),
            "harvest submission abandoned",
        )
        .await;

    let (status, body) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::LEDGER, "gateway unreachable")
        .await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_any_instance() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test(start_paused = true)]
async fn test_status_lists_running_instances() {
    let dir = tempfile::TempDir::new().unwrap();
    let (app, state) = setup_test_app().await;
    let config = EscConfig {
        chaincode_name: "traffic".to_string(),
        results_path: dir.path().to_path_buf(),
        execution_time: 10.0,
        ..Default::default()
    };
    let ledger = SimulatedLedger::builder()
        .auto_events(true)
        .with_esc_contracts(&config)
        .build();
    state
        .runtime
        .spawn(config, Arc::new(ledger), Arc::new(EmptySource))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(3_500)).await;

    let (status, body) = get(app.clone(), "/status").await;

    assert_eq!(status, StatusCode::OK);
    let response: StatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.instances.len(), 1);
    assert_eq!(response.instances[0].key, "traffic");
    assert_eq!(response.instances[0].harvest_frequency, 1.0);
    assert_eq!(response.instances[0].updates_issued, 3);

    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    state.runtime.stop_all();
    state.runtime.wait_all().await;
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;

    let metrics = EscMetrics::new();
    metrics.inc_submission("traffic", "harvest", "submitted");
    metrics.observe_analysis_latency("traffic", 0.8);
    metrics.set_harvest_frequency("traffic", 1.0);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("esc_submission_attempts_total"));
    assert!(metrics_text.contains("esc_analysis_latency_seconds_bucket"));
    assert!(metrics_text.contains("esc_harvest_frequency_seconds"));
}
