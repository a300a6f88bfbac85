use std::collections::VecDeque;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::model::{Deliverable, Identity};

/// 队列满时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// 丢弃最旧的一条，为新消息腾出位置
    DropOldest,
    /// 不限长度（兼容模式，队列可能无限增长）
    Unbounded,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropOldest
    }
}

/// 队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 队列满时的处理策略
    pub overflow: OverflowPolicy,
    /// 每个身份最大离线消息数（Unbounded 时忽略）
    pub max_messages_per_identity: usize,
    /// 消息最长保留时间（秒），None 表示不过期
    pub max_age_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            overflow: OverflowPolicy::DropOldest,
            max_messages_per_identity: 500,
            max_age_secs: None,
        }
    }
}

impl QueueConfig {
    /// 兼容模式：不限长度、不过期
    pub fn unbounded() -> Self {
        Self {
            overflow: OverflowPolicy::Unbounded,
            max_messages_per_identity: 0,
            max_age_secs: None,
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    fn capacity(&self) -> Option<usize> {
        match self.overflow {
            OverflowPolicy::DropOldest => Some(self.max_messages_per_identity.max(1)),
            OverflowPolicy::Unbounded => None,
        }
    }
}

/// 队列统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// 累计入队数
    pub total_enqueued: u64,
    /// 累计通过 drain 取出数
    pub total_drained: u64,
    /// 因队列满被丢弃的数量
    pub total_evicted: u64,
    /// 因过期被丢弃的数量
    pub total_expired: u64,
    /// 当前待投递总数
    pub pending_messages: u64,
    /// 当前有待投递消息的身份数
    pub identity_count: u64,
}

/// 入队结果
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Queued,
    /// 入队成功，但挤掉了最旧的一条
    QueuedWithEviction(Deliverable),
}

#[derive(Debug)]
struct QueuedDeliverable {
    deliverable: Deliverable,
    enqueued_at: Instant,
}

/// 离线消息队列
///
/// 每个身份一条 FIFO 队列。条目只会被该身份的 drain 一次性取走
/// （或按配置因容量 / 过期被淘汰）。
#[derive(Debug, Default)]
pub struct OfflineQueue {
    /// 用户队列映射
    queues: FxHashMap<Identity, VecDeque<QueuedDeliverable>>,
    config: QueueConfig,
    stats: QueueStats,
}

impl OfflineQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            queues: FxHashMap::default(),
            config,
            stats: QueueStats::default(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// 追加一条待投递物，首次使用时创建队列
    pub fn enqueue(&mut self, identity: Identity, deliverable: Deliverable) -> EnqueueOutcome {
        let capacity = self.config.capacity();
        let queue = self.queues.entry(identity).or_default();

        let mut evicted = None;
        if let Some(capacity) = capacity {
            if queue.len() >= capacity {
                evicted = queue.pop_front().map(|entry| entry.deliverable);
            }
        }

        queue.push_back(QueuedDeliverable {
            deliverable,
            enqueued_at: Instant::now(),
        });
        self.stats.total_enqueued += 1;

        match evicted {
            Some(deliverable) => {
                self.stats.total_evicted += 1;
                warn!(
                    "⚠️ OfflineQueue: 队列已满，丢弃最旧的 {} (recipient={})",
                    deliverable.event_name(),
                    deliverable.recipient()
                );
                EnqueueOutcome::QueuedWithEviction(deliverable)
            }
            None => EnqueueOutcome::Queued,
        }
    }

    /// 取出该身份的全部待投递物（FIFO），过期条目直接丢弃
    pub fn drain(&mut self, identity: &Identity) -> Vec<Deliverable> {
        let Some(queue) = self.queues.remove(identity) else {
            return Vec::new();
        };

        let max_age = self.config.max_age();
        let now = Instant::now();
        let mut expired = 0u64;

        let drained: Vec<Deliverable> = queue
            .into_iter()
            .filter_map(|entry| match max_age {
                Some(max_age) if now.duration_since(entry.enqueued_at) > max_age => {
                    expired += 1;
                    None
                }
                _ => Some(entry.deliverable),
            })
            .collect();

        self.stats.total_expired += expired;
        self.stats.total_drained += drained.len() as u64;

        if expired > 0 {
            debug!(
                "🧹 OfflineQueue: 为 {} 取出时丢弃 {} 条过期消息",
                identity, expired
            );
        }

        drained
    }

    pub fn has_pending(&self, identity: &Identity) -> bool {
        self.queues
            .get(identity)
            .map(|queue| !queue.is_empty())
            .unwrap_or(false)
    }

    /// 调用时刻有待投递消息的身份快照
    pub fn pending_identities(&self) -> Vec<Identity> {
        self.queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// 清理所有过期条目，返回清理数量
    pub fn purge_expired(&mut self) -> usize {
        let Some(max_age) = self.config.max_age() else {
            return 0;
        };

        let now = Instant::now();
        let mut total_cleaned = 0;

        for (identity, queue) in self.queues.iter_mut() {
            let before = queue.len();
            queue.retain(|entry| now.duration_since(entry.enqueued_at) <= max_age);
            let cleaned = before - queue.len();
            if cleaned > 0 {
                total_cleaned += cleaned;
                debug!("🧹 OfflineQueue: 清理 {} 的 {} 条过期消息", identity, cleaned);
            }
        }

        // 移除空队列
        self.queues.retain(|_, queue| !queue.is_empty());
        self.stats.total_expired += total_cleaned as u64;

        total_cleaned
    }

    /// 某身份当前待投递数量
    pub fn len(&self, identity: &Identity) -> usize {
        self.queues.get(identity).map(VecDeque::len).unwrap_or(0)
    }

    /// 所有身份的待投递总数
    pub fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    /// 只读查看某身份的队列内容（按入队顺序）
    pub fn peek(&self, identity: &Identity) -> Vec<&Deliverable> {
        self.queues
            .get(identity)
            .map(|queue| queue.iter().map(|entry| &entry.deliverable).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending_messages: self.total_len() as u64,
            identity_count: self.queues.values().filter(|q| !q.is_empty()).count() as u64,
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConversationNotice;

    fn notice(n: usize) -> Deliverable {
        Deliverable::ConversationCreated(ConversationNotice {
            sender_id: Identity::from("sender"),
            recipient_id: Identity::from("bob"),
            username: format!("user-{}", n),
        })
    }

    fn bob() -> Identity {
        Identity::from("bob")
    }

    #[test]
    fn test_enqueue_then_drain_is_fifo() {
        let mut queue = OfflineQueue::new(QueueConfig::default());
        for i in 0..5 {
            assert_eq!(queue.enqueue(bob(), notice(i)), EnqueueOutcome::Queued);
        }
        assert!(queue.has_pending(&bob()));
        assert_eq!(queue.len(&bob()), 5);

        let drained = queue.drain(&bob());
        assert_eq!(drained, (0..5).map(notice).collect::<Vec<_>>());
        assert!(!queue.has_pending(&bob()));
        assert!(queue.drain(&bob()).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_unknown_identity_is_empty() {
        let mut queue = OfflineQueue::new(QueueConfig::default());
        assert!(queue.drain(&Identity::from("nobody")).is_empty());
    }

    #[test]
    fn test_pending_identities_is_snapshot() {
        let mut queue = OfflineQueue::new(QueueConfig::default());
        queue.enqueue(Identity::from("a"), notice(0));
        queue.enqueue(Identity::from("b"), notice(1));

        let mut snapshot = queue.pending_identities();
        snapshot.sort();
        queue.enqueue(Identity::from("c"), notice(2));

        assert_eq!(snapshot, vec![Identity::from("a"), Identity::from("b")]);
        assert_eq!(queue.pending_identities().len(), 3);
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let config = QueueConfig {
            max_messages_per_identity: 2,
            ..QueueConfig::default()
        };
        let mut queue = OfflineQueue::new(config);

        queue.enqueue(bob(), notice(1));
        queue.enqueue(bob(), notice(2));
        let outcome = queue.enqueue(bob(), notice(3));

        assert_eq!(outcome, EnqueueOutcome::QueuedWithEviction(notice(1)));
        assert_eq!(queue.drain(&bob()), vec![notice(2), notice(3)]);
        assert_eq!(queue.stats().total_evicted, 1);
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let mut queue = OfflineQueue::new(QueueConfig::unbounded());
        for i in 0..1000 {
            assert_eq!(queue.enqueue(bob(), notice(i)), EnqueueOutcome::Queued);
        }
        assert_eq!(queue.len(&bob()), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_dropped() {
        let config = QueueConfig {
            max_age_secs: Some(60),
            ..QueueConfig::default()
        };
        let mut queue = OfflineQueue::new(config);

        queue.enqueue(bob(), notice(1));
        tokio::time::advance(Duration::from_secs(45)).await;
        queue.enqueue(bob(), notice(2));
        queue.enqueue(Identity::from("carol"), notice(3));
        tokio::time::advance(Duration::from_secs(30)).await;

        // notice(1) 已超过 60 秒
        assert_eq!(queue.drain(&bob()), vec![notice(2)]);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(queue.purge_expired(), 1);
        assert!(queue.pending_identities().is_empty());
        assert_eq!(queue.stats().total_expired, 2);
    }

    #[test]
    fn test_purge_without_ttl_is_noop() {
        let mut queue = OfflineQueue::new(QueueConfig::default());
        queue.enqueue(bob(), notice(1));
        assert_eq!(queue.purge_expired(), 0);
        assert_eq!(queue.len(&bob()), 1);
    }

    #[test]
    fn test_stats_reflect_current_state() {
        let mut queue = OfflineQueue::new(QueueConfig::default());
        queue.enqueue(bob(), notice(1));
        queue.enqueue(Identity::from("carol"), notice(2));
        queue.drain(&bob());

        let stats = queue.stats();
        assert_eq!(stats.total_enqueued, 2);
        assert_eq!(stats.total_drained, 1);
        assert_eq!(stats.pending_messages, 1);
        assert_eq!(stats.identity_count, 1);
    }
}
