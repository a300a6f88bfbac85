//! HTTP 服务器模块 - 使用 Axum 提供 WebSocket 接入和运维接口
//!
//! 功能包括：
//! - WebSocket 接入（默认 `/ws`）
//! - 健康检查接口
//! - Prometheus 指标接口

pub mod routes;
pub mod server;
pub mod ws;

pub use server::{HttpServerState, RelayHttpServer};
