use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::infra::transport::Transport;
use crate::model::{ConnectionId, ServerEvent};

/// 连接句柄
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection: ConnectionId,
    /// 写任务的发送端
    outbound: mpsc::UnboundedSender<Message>,
}

/// 连接管理器
///
/// 跟踪活跃的 WebSocket 连接，实现 `Transport`：
/// 每条连接由独立的写任务消费一个无界通道，发送只是把帧推入通道，不会阻塞调用方。
/// 使用 DashMap（分片锁）替代 RwLock<HashMap>，减少锁争用。
#[derive(Debug)]
pub struct ConnectionManager {
    /// 连接映射：connection -> ConnectionHandle
    connections: DashMap<ConnectionId, ConnectionHandle>,
    next_id: AtomicU64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// 创建新的连接管理器
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册新连接，返回连接 ID 和写任务要消费的接收端
    pub fn register_connection(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let connection = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, receiver) = mpsc::unbounded_channel();

        self.connections.insert(
            connection,
            ConnectionHandle {
                connection,
                outbound,
            },
        );

        debug!("📝 ConnectionManager: 注册连接 {}", connection);
        (connection, receiver)
    }

    /// 注销连接；发送端随之释放，写任务在排空后退出
    pub fn unregister_connection(&self, connection: ConnectionId) -> Option<ConnectionHandle> {
        let removed = self.connections.remove(&connection).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!("📝 ConnectionManager: 注销连接 {}", connection);
        }
        removed
    }

    /// 直接向连接推送一帧（如 Pong）
    pub fn send_raw(&self, connection: ConnectionId, message: Message) -> bool {
        match self.connections.get(&connection) {
            Some(handle) => handle.outbound.send(message).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    /// 获取活跃连接数
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn encode(event: &ServerEvent) -> Option<Message> {
        match event.to_frame() {
            Ok(frame) => Some(Message::Text(frame.into())),
            Err(e) => {
                warn!(
                    "⚠️ ConnectionManager: 编码 {} 失败: {}",
                    event.name(),
                    e
                );
                None
            }
        }
    }
}

impl Transport for ConnectionManager {
    fn send(&self, connection: ConnectionId, event: &ServerEvent) {
        let Some(message) = Self::encode(event) else {
            return;
        };
        if !self.send_raw(connection, message) {
            debug!(
                "📭 ConnectionManager: 连接 {} 已不存在，丢弃 {}",
                connection,
                event.name()
            );
        }
    }

    fn broadcast(&self, event: &ServerEvent) {
        let Some(message) = Self::encode(event) else {
            return;
        };
        for entry in self.connections.iter() {
            let _ = entry.outbound.send(message.clone());
        }
        debug!(
            "📢 ConnectionManager: 广播 {} 到 {} 个连接",
            event.name(),
            self.connections.len()
        );
    }

    fn close(&self, connection: ConnectionId) {
        if let Some(handle) = self.unregister_connection(connection) {
            let _ = handle.outbound.send(Message::Close(None));
            info!("🔌 ConnectionManager: 关闭连接 {}", connection);
        }
    }
}
