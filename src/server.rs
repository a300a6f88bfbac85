use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::dispatcher::{MessageDispatcher, RelayStats};
use crate::error::{Result, ServerError};
use crate::http::server::bind;
use crate::http::{HttpServerState, RelayHttpServer};
use crate::infra::{ConnectionManager, TransportEvent};

/// 传输层 -> 分发循环的事件通道容量
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 分发循环
///
/// 独占 `MessageDispatcher`：逐个处理传输层事件，并按调度器间隔执行重试扫描。
/// 第一次扫描在启动一个完整间隔之后。每轮结束后把统计发布到 `stats`。
/// 收到关闭信号或事件通道关闭时退出，并交还 dispatcher。
pub async fn run_dispatch_loop(
    mut dispatcher: MessageDispatcher,
    mut events: mpsc::Receiver<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
    stats: watch::Sender<RelayStats>,
) -> MessageDispatcher {
    let period = dispatcher.scheduler().interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("🔄 分发循环已启动，重试间隔 {:?}", period);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => dispatcher.handle(event),
                None => {
                    info!("📪 事件通道已关闭，分发循环退出");
                    break;
                }
            },
            _ = ticker.tick() => {
                dispatcher.sweep();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("🛑 收到关闭信号，分发循环退出");
                    break;
                }
            }
        }

        stats.send_replace(dispatcher.stats());
    }

    debug!("📊 分发循环最终统计: {:?}", dispatcher.stats());
    dispatcher
}

/// 中继服务器
pub struct RelayServer {
    config: ServerConfig,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// 运行服务器直到 Ctrl-C
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("🛑 收到 Ctrl-C，准备关闭..."),
                Err(e) => error!("❌ 无法监听 Ctrl-C: {}", e),
            }
            let _ = shutdown_tx.send(true);
        });

        self.run_until(shutdown_rx).await
    }

    /// 运行服务器直到 `shutdown` 变为 true
    pub async fn run_until(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = bind(&self.config.bind_address()).await?;
        self.serve(listener, shutdown).await
    }

    /// 在已绑定的监听器上运行服务器直到 `shutdown` 变为 true
    pub async fn serve(self, listener: TcpListener, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("🚀 启动中继服务器...");
        self.show_config_info();

        // 初始化 Prometheus 指标（供 GET /metrics 暴露）
        if self.config.metrics.enabled {
            match crate::infra::metrics::init() {
                Ok(()) => info!("📊 Prometheus 指标已启用，GET /metrics 可用"),
                Err(e) => debug!("📊 Prometheus 指标未重新安装: {}", e),
            }
        }

        let connections = Arc::new(ConnectionManager::new());
        let dispatcher = MessageDispatcher::new(connections.clone(), self.config.relay.clone());
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stats_tx, stats_rx) = watch::channel(RelayStats::default());

        let dispatch_loop = tokio::spawn(run_dispatch_loop(
            dispatcher,
            events_rx,
            shutdown.clone(),
            stats_tx,
        ));

        let http_server = RelayHttpServer::new(
            HttpServerState {
                connections,
                events: events_tx,
                stats: stats_rx,
                started_at: Instant::now(),
            },
            self.config.bind_address(),
            self.config.server.ws_path.clone(),
        );

        let served = http_server.serve(listener, shutdown).await;

        let dispatcher = dispatch_loop
            .await
            .map_err(|e| ServerError::Internal(format!("分发循环异常退出: {}", e)))?;
        info!(
            "✅ 中继服务器已停止 (剩余离线消息 {} 条)",
            dispatcher.router().offline_queue().total_len()
        );

        served
    }

    /// 显示配置信息
    fn show_config_info(&self) {
        let relay = &self.config.relay;
        info!("📊 服务器配置信息:");
        info!("  - 监听地址: {}", self.config.bind_address());
        info!("  - WebSocket 路径: {}", self.config.server.ws_path);
        info!("  - 重试间隔: {}秒", relay.retry_interval_secs);
        info!("  - 在线列表范围: {:?}", relay.users_list_scope);
        info!("  - 重新绑定策略: {:?}", relay.rebind_policy);
        info!("  - 补发事件名: {:?}", relay.flush_event_names);
        info!(
            "  - 离线队列: {:?} (上限 {}, 过期 {:?}秒)",
            relay.queue.overflow, relay.queue.max_messages_per_identity, relay.queue.max_age_secs
        );
        info!(
            "  - Prometheus 指标: {}",
            if self.config.metrics.enabled {
                "启用"
            } else {
                "禁用"
            }
        );
    }
}
