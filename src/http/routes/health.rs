//! GET /health - 健康检查

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::http::HttpServerState;

/// GET /health：返回运行时长与分发循环最近一次发布的统计
pub async fn health_handler(State(state): State<HttpServerState>) -> Json<Value> {
    let stats = state.stats.borrow().clone();
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "live_connections": state.connections.connection_count(),
        "stats": stats,
    }))
}
