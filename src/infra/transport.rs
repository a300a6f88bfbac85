use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{ClientEvent, ConnectionId, ServerEvent};

/// 传输层上报给分发循环的事件
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// 新连接建立（尚未声明身份）
    Connected(ConnectionId),
    /// 连接上收到一个客户端事件
    Inbound {
        connection: ConnectionId,
        event: ClientEvent,
    },
    /// 连接断开
    Disconnected(ConnectionId),
}

/// 传输层发送原语
///
/// 所有方法都是 fire-and-forget：不阻塞、不返回结果，
/// 发往已断开连接的帧由实现方静默丢弃。
pub trait Transport: Send + Sync {
    /// 向单个连接发送事件
    fn send(&self, connection: ConnectionId, event: &ServerEvent);

    /// 向所有连接广播事件
    fn broadcast(&self, event: &ServerEvent);

    /// 关闭连接
    fn close(&self, connection: ConnectionId);
}

/// 记录下来的一次发送
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    To(ConnectionId, ServerEvent),
    Broadcast(ServerEvent),
    Close(ConnectionId),
}

/// 内存传输（用于测试和嵌入场景），记录所有发送动作
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取走已记录的发送动作
    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock())
    }

    /// 已记录发送动作的副本
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// 发给指定连接的事件
    pub fn sent_to(&self, connection: ConnectionId) -> Vec<ServerEvent> {
        self.deliveries()
            .into_iter()
            .filter_map(|delivery| match delivery {
                Delivery::To(target, event) if target == connection => Some(event),
                _ => None,
            })
            .collect()
    }

    /// 所有广播过的事件
    pub fn broadcasts(&self) -> Vec<ServerEvent> {
        self.deliveries()
            .into_iter()
            .filter_map(|delivery| match delivery {
                Delivery::Broadcast(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn record(&self, delivery: Delivery) {
        self.deliveries.lock().push(delivery);
    }
}

impl Transport for MemoryTransport {
    fn send(&self, connection: ConnectionId, event: &ServerEvent) {
        self.record(Delivery::To(connection, event.clone()));
    }

    fn broadcast(&self, event: &ServerEvent) {
        self.record(Delivery::Broadcast(event.clone()));
    }

    fn close(&self, connection: ConnectionId) {
        self.record(Delivery::Close(connection));
    }
}
