//! Prometheus 指标：连接数、在线身份数、离线队列深度、投递量等
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。
//! 未安装 Recorder 时所有 `record_*` 调用都是空操作。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const GAUGE_CONNECTIONS: &str = "relay_connections_current";
const GAUGE_PRESENCE: &str = "relay_identities_bound";
const GAUGE_OFFLINE_QUEUE_DEPTH: &str = "relay_offline_queue_depth";
const COUNTER_DELIVERED: &str = "relay_deliverables_delivered_total";
const COUNTER_QUEUED: &str = "relay_deliverables_queued_total";
const COUNTER_FLUSHED: &str = "relay_deliverables_flushed_total";
const COUNTER_EVICTED: &str = "relay_deliverables_evicted_total";
const COUNTER_SWEEPS: &str = "relay_retry_sweeps_total";

/// 初始化 Prometheus 指标（安装全局 Recorder）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 更新当前连接数（Gauge）。在连接注册/注销后调用。
pub fn record_connection_count(count: usize) {
    metrics::gauge!(GAUGE_CONNECTIONS).set(count as f64);
}

/// 更新已绑定身份数（Gauge）。
pub fn record_presence_count(count: usize) {
    metrics::gauge!(GAUGE_PRESENCE).set(count as f64);
}

/// 更新离线队列深度（Gauge）。
pub fn record_offline_queue_depth(depth: usize) {
    metrics::gauge!(GAUGE_OFFLINE_QUEUE_DEPTH).set(depth as f64);
}

/// 实时投递 +1（按事件名）。
pub fn record_delivered(event: &'static str) {
    metrics::counter!(COUNTER_DELIVERED, "event" => event).increment(1);
}

/// 入离线队列 +1（按事件名）。
pub fn record_queued(event: &'static str) {
    metrics::counter!(COUNTER_QUEUED, "event" => event).increment(1);
}

/// 离线补发数量。
pub fn record_flushed(count: usize) {
    metrics::counter!(COUNTER_FLUSHED).increment(count as u64);
}

/// 因队列满被丢弃 +1。
pub fn record_evicted() {
    metrics::counter!(COUNTER_EVICTED).increment(1);
}

/// 重试扫描 +1。
pub fn record_sweep() {
    metrics::counter!(COUNTER_SWEEPS).increment(1);
}
