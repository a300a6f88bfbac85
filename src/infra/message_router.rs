use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::infra::metrics;
use crate::infra::presence_registry::PresenceRegistry;
use crate::infra::transport::Transport;
use crate::model::{ConnectionId, Deliverable, FlushEventNames, Identity};
use crate::offline::{EnqueueOutcome, OfflineQueue, QueueConfig};

/// 消息路由结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResult {
    /// 收件人在线，已立即发送
    Delivered(ConnectionId),
    /// 收件人离线，已存入离线队列
    Queued {
        /// 是否因队列满挤掉了一条旧消息
        evicted: bool,
    },
}

/// 消息路由统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRouterStats {
    /// 总路由数
    pub total_routed: u64,
    /// 实时投递数
    pub delivered_live: u64,
    /// 入离线队列数
    pub queued: u64,
    /// 离线补发数
    pub flushed: u64,
    /// 执行过的非空补发次数
    pub flushes: u64,
}

/// 消息路由器
///
/// 持有在线注册表与离线队列：收件人在线则立即发送，否则入队，
/// 之后在其上线或重试扫描时按入队顺序补发。
/// 发送是 fire-and-forget，发送尝试即视为投递成功。
pub struct MessageRouter {
    presence: PresenceRegistry,
    offline_queue: OfflineQueue,
    transport: Arc<dyn Transport>,
    flush_event_names: FlushEventNames,
    stats: MessageRouterStats,
}

impl MessageRouter {
    /// 创建新的消息路由器
    pub fn new(transport: Arc<dyn Transport>, queue_config: QueueConfig) -> Self {
        Self {
            presence: PresenceRegistry::new(),
            offline_queue: OfflineQueue::new(queue_config),
            transport,
            flush_event_names: FlushEventNames::default(),
            stats: MessageRouterStats::default(),
        }
    }

    /// 设置离线补发的事件名
    pub fn with_flush_event_names(mut self, names: FlushEventNames) -> Self {
        self.flush_event_names = names;
        self
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn presence_mut(&mut self) -> &mut PresenceRegistry {
        &mut self.presence
    }

    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.offline_queue
    }

    pub fn offline_queue_mut(&mut self) -> &mut OfflineQueue {
        &mut self.offline_queue
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn stats(&self) -> MessageRouterStats {
        self.stats.clone()
    }

    /// 路由一条投递物到指定身份
    pub fn route(&mut self, deliverable: Deliverable, recipient: &Identity) -> RouteResult {
        self.stats.total_routed += 1;
        let event_name = deliverable.event_name();

        match self.presence.lookup(recipient) {
            Some(connection) => {
                self.transport.send(connection, &deliverable.into_event());
                self.stats.delivered_live += 1;
                metrics::record_delivered(event_name);
                debug!(
                    "📤 MessageRouter: {} -> {} ({})",
                    event_name, recipient, connection
                );
                RouteResult::Delivered(connection)
            }
            None => {
                let outcome = self.offline_queue.enqueue(recipient.clone(), deliverable);
                self.stats.queued += 1;
                metrics::record_queued(event_name);
                metrics::record_offline_queue_depth(self.offline_queue.total_len());

                let evicted = matches!(outcome, EnqueueOutcome::QueuedWithEviction(_));
                if evicted {
                    metrics::record_evicted();
                }
                info!(
                    "📥 MessageRouter: 收件人 {} 离线，{} 已入队 (pending={})",
                    recipient,
                    event_name,
                    self.offline_queue.len(recipient)
                );
                RouteResult::Queued { evicted }
            }
        }
    }

    /// 身份在线且有待投递消息时，按入队顺序全部补发，返回补发数量
    pub fn flush_for(&mut self, identity: &Identity) -> usize {
        let Some(connection) = self.presence.lookup(identity) else {
            return 0;
        };
        if !self.offline_queue.has_pending(identity) {
            return 0;
        }

        let deliverables = self.offline_queue.drain(identity);
        let count = deliverables.len();
        metrics::record_offline_queue_depth(self.offline_queue.total_len());

        // 队列里只剩过期条目：被 drain 丢弃，不算一次补发
        if count == 0 {
            return 0;
        }

        for deliverable in deliverables {
            debug!(
                "📤 MessageRouter: 补发 {} -> {} ({})",
                deliverable.event_name(),
                identity,
                connection
            );
            let event = deliverable.into_queued_event(self.flush_event_names);
            self.transport.send(connection, &event);
        }

        self.stats.flushed += count as u64;
        self.stats.flushes += 1;
        metrics::record_flushed(count);

        info!(
            "📬 MessageRouter: 已向 {} 补发 {} 条离线消息",
            identity, count
        );

        count
    }
}
