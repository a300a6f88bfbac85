//! HTTP 服务器 - 使用 Axum 承载 WebSocket 接入

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::dispatcher::RelayStats;
use crate::error::{Result, ServerError};
use crate::http::routes;
use crate::infra::{ConnectionManager, TransportEvent};

/// HTTP 服务器共享状态
#[derive(Clone)]
pub struct HttpServerState {
    /// 活跃连接
    pub connections: Arc<ConnectionManager>,
    /// 发往分发循环的事件通道
    pub events: mpsc::Sender<TransportEvent>,
    /// 分发循环发布的最新统计
    pub stats: watch::Receiver<RelayStats>,
    pub started_at: Instant,
}

/// HTTP / WebSocket 服务器
pub struct RelayHttpServer {
    state: HttpServerState,
    bind_address: String,
    ws_path: String,
}

impl RelayHttpServer {
    /// 创建新的 HTTP 服务器
    pub fn new(state: HttpServerState, bind_address: String, ws_path: String) -> Self {
        Self {
            state,
            bind_address,
            ws_path,
        }
    }

    /// 构建路由
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::create_routes(&self.ws_path))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// 绑定配置的地址并启动 HTTP 服务器，直到收到关闭信号
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = bind(&self.bind_address).await?;
        self.serve(listener, shutdown).await
    }

    /// 在已绑定的监听器上提供服务，直到收到关闭信号
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let app = self.router();
        let local_addr = listener.local_addr()?;

        info!(
            "🌐 HTTP 服务器启动在 {} (WebSocket: {})",
            local_addr, self.ws_path
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow_and_update() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await?;

        info!("✅ HTTP 服务器已停止");
        Ok(())
    }
}

/// 绑定监听地址
pub async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|e| ServerError::Network(format!("无法绑定 {}: {}", address, e)))
}
