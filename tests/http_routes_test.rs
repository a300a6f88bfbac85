use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chat_relay::http::{HttpServerState, RelayHttpServer};
use chat_relay::{ConnectionManager, RelayStats, TransportEvent};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tower::ServiceExt;

/// 创建测试用的路由（不绑定端口）
fn create_test_app() -> (Router, watch::Sender<RelayStats>, mpsc::Receiver<TransportEvent>) {
    let (events_tx, events_rx) = mpsc::channel(4);
    let (stats_tx, stats_rx) = watch::channel(RelayStats::default());
    let state = HttpServerState {
        connections: Arc::new(ConnectionManager::new()),
        events: events_tx,
        stats: stats_rx,
        started_at: Instant::now(),
    };
    let app = RelayHttpServer::new(state, "127.0.0.1:0".to_string(), "/ws".to_string()).router();
    (app, stats_tx, events_rx)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_reports_latest_stats() {
    let (app, stats_tx, _events_rx) = create_test_app();

    let mut stats = RelayStats::default();
    stats.bound_identities = 3;
    stats.queue.pending_messages = 7;
    stats_tx.send_replace(stats);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["live_connections"], 0);
    assert_eq!(value["stats"]["bound_identities"], 3);
    assert_eq!(value["stats"]["queue"]["pending_messages"], 7);
}

#[tokio::test]
async fn test_metrics_unavailable_when_disabled() {
    let (app, _stats_tx, _events_rx) = create_test_app();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_ws_route_requires_upgrade() {
    let (app, _stats_tx, mut events_rx) = create_test_app();

    let response = app.oneshot(get("/ws")).await.unwrap();
    assert!(response.status().is_client_error());
    assert!(events_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (app, _stats_tx, _events_rx) = create_test_app();

    let response = app.oneshot(get("/api/admin/users")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
