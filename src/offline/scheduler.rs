use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::infra::message_router::MessageRouter;
use crate::infra::metrics;

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 重试扫描间隔（秒）
    pub retry_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

/// 单次扫描报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 扫描开始时有待投递消息的身份数
    pub pending_identities: usize,
    /// 本次补发到的身份数
    pub flushed_identities: usize,
    /// 本次补发的消息数
    pub flushed_messages: usize,
    /// 本次清理的过期消息数
    pub expired: usize,
}

/// 调度器统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_sweeps: u64,
    pub total_flushed: u64,
    pub total_expired: u64,
    pub last_sweep_time: Option<DateTime<Utc>>,
}

/// 离线消息重试调度器
///
/// 周期性兜底：补发那些收件人已上线、但没有被即时补发的离线消息。
/// 自身不持有定时器，由分发循环按 `interval()` 驱动 `sweep()`。
#[derive(Debug, Default)]
pub struct RetryScheduler {
    config: SchedulerConfig,
    stats: SchedulerStats,
}

impl RetryScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn interval(&self) -> Duration {
        self.config.interval()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }

    /// 执行一次扫描
    ///
    /// 先清理过期条目，再对扫描开始时的待投递身份快照逐个补发；
    /// 仍未上线的身份保持原样，等待下一次扫描。
    pub fn sweep(&mut self, router: &mut MessageRouter) -> SweepReport {
        let expired = router.offline_queue_mut().purge_expired();
        let pending = router.offline_queue().pending_identities();

        let mut report = SweepReport {
            pending_identities: pending.len(),
            expired,
            ..SweepReport::default()
        };

        for identity in &pending {
            if !router.presence().is_bound(identity) {
                continue;
            }
            let flushed = router.flush_for(identity);
            if flushed > 0 {
                report.flushed_identities += 1;
                report.flushed_messages += flushed;
            }
        }

        self.stats.total_sweeps += 1;
        self.stats.total_flushed += report.flushed_messages as u64;
        self.stats.total_expired += report.expired as u64;
        self.stats.last_sweep_time = Some(Utc::now());
        metrics::record_sweep();

        if report.flushed_messages > 0 || report.expired > 0 {
            info!(
                "🔄 RetryScheduler: 扫描 {} 个身份，补发 {} 条 ({} 个身份)，清理过期 {} 条",
                report.pending_identities,
                report.flushed_messages,
                report.flushed_identities,
                report.expired
            );
        } else {
            debug!(
                "🔄 RetryScheduler: 扫描完成，{} 个身份仍离线",
                report.pending_identities
            );
        }

        report
    }
}
