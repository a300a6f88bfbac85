//! HTTP 路由模块
//!
//! 路由结构：
//! - `<ws_path>` - WebSocket 接入（默认 `/ws`）
//! - `/health`   - 健康检查与运行统计
//! - `/metrics`  - Prometheus 抓取端点

pub mod health;
pub mod metrics;

use axum::{routing::get, Router};

use crate::http::ws::ws_handler;
use crate::http::HttpServerState;

/// 创建所有路由
pub fn create_routes(ws_path: &str) -> Router<HttpServerState> {
    Router::new()
        .route(ws_path, get(ws_handler))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
}
