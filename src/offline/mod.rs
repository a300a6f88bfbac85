// 离线消息模块
// 收件人离线时暂存投递物，上线或重试扫描时补发

pub mod queue;
pub mod scheduler;

pub use queue::{EnqueueOutcome, OfflineQueue, OverflowPolicy, QueueConfig, QueueStats};
pub use scheduler::{RetryScheduler, SchedulerConfig, SchedulerStats, SweepReport};
