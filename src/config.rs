use std::env;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dispatcher::RelayConfig;
use crate::offline::OverflowPolicy;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 环境变量前缀
const ENV_PREFIX: &str = "RELAY_";

/// 服务器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听配置
    pub server: ListenConfig,
    /// 中继行为配置
    pub relay: RelayConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 监控指标配置
    pub metrics: MetricsConfig,
}

/// 监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// 服务器监听地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// WebSocket 路径
    pub ws_path: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            ws_path: "/ws".to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 日志格式：compact / pretty / json
    pub format: Option<String>,
    /// 日志文件路径
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
            file: None,
        }
    }
}

/// 监控指标配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 是否启用 Prometheus 指标
    pub enabled: bool,
}

/// 启动早期读取的日志配置（完整配置加载前用于初始化日志）
#[derive(Debug, Clone, Default)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EarlyToml {
    #[serde(default)]
    logging: Option<EarlyLoggingToml>,
}

#[derive(Debug, Default, Deserialize)]
struct EarlyLoggingToml {
    level: Option<String>,
    format: Option<String>,
    file: Option<String>,
}

/// 快速读取配置文件的 [logging] 段；文件不存在或格式错误时返回空配置
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    let path = config_file.unwrap_or(DEFAULT_CONFIG_FILE);
    let Ok(content) = fs::read_to_string(path) else {
        return EarlyLoggingConfig::default();
    };

    let logging = toml::from_str::<EarlyToml>(&content)
        .ok()
        .and_then(|parsed| parsed.logging)
        .unwrap_or_default();

    EarlyLoggingConfig {
        level: logging.level,
        format: logging.format,
        file: logging.file,
    }
}

impl ServerConfig {
    /// 创建新的服务器配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 从 TOML 文本解析配置（缺省字段取默认值）
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("配置文件格式错误")?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// 从环境变量加载配置（RELAY_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        self.merge_from_vars(|key| env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// 按给定的取值函数合并配置，键名不含前缀
    pub fn merge_from_vars<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 服务器配置
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("{}PORT 无效: {}", ENV_PREFIX, port))?;
        }
        if let Some(ws_path) = var("WS_PATH") {
            self.server.ws_path = ws_path;
        }

        // 中继配置
        if let Some(interval) = var("RETRY_INTERVAL_SECS") {
            self.relay.retry_interval_secs = interval
                .parse()
                .with_context(|| format!("{}RETRY_INTERVAL_SECS 无效: {}", ENV_PREFIX, interval))?;
        }
        if let Some(scope) = var("USERS_LIST_SCOPE") {
            self.relay.users_list_scope = parse_enum(&scope, "USERS_LIST_SCOPE")?;
        }
        if let Some(policy) = var("REBIND_POLICY") {
            self.relay.rebind_policy = parse_enum(&policy, "REBIND_POLICY")?;
        }
        if let Some(names) = var("FLUSH_EVENT_NAMES") {
            self.relay.flush_event_names = parse_enum(&names, "FLUSH_EVENT_NAMES")?;
        }

        // 离线队列配置
        if let Some(overflow) = var("QUEUE_OVERFLOW") {
            self.relay.queue.overflow = parse_enum(&overflow, "QUEUE_OVERFLOW")?;
        }
        if let Some(max) = var("QUEUE_MAX_MESSAGES") {
            self.relay.queue.max_messages_per_identity = max
                .parse()
                .with_context(|| format!("{}QUEUE_MAX_MESSAGES 无效: {}", ENV_PREFIX, max))?;
        }
        if let Some(max_age) = var("QUEUE_MAX_AGE_SECS") {
            self.relay.queue.max_age_secs = Some(
                max_age
                    .parse()
                    .with_context(|| format!("{}QUEUE_MAX_AGE_SECS 无效: {}", ENV_PREFIX, max_age))?,
            );
        }

        // 日志与监控
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = Some(format);
        }
        if let Some(file) = var("LOG_FILE") {
            self.logging.file = Some(file);
        }
        if let Some(enabled) = var("METRICS_ENABLED") {
            self.metrics.enabled = matches!(enabled.as_str(), "1" | "true" | "yes" | "on");
        }

        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(interval) = cli.retry_interval {
            self.relay.retry_interval_secs = interval;
        }
        if let Some(level) = cli.get_log_level() {
            self.logging.level = level;
        }
        if let Some(format) = cli.get_log_format() {
            self.logging.format = Some(format);
        }
        if let Some(file) = &cli.log_file {
            self.logging.file = Some(file.clone());
        }
        if cli.enable_metrics {
            self.metrics.enabled = true;
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port 不能为 0");
        }
        if !self.server.ws_path.starts_with('/') {
            bail!("server.ws_path 必须以 / 开头: {}", self.server.ws_path);
        }
        if matches!(self.server.ws_path.as_str(), "/health" | "/metrics") {
            bail!("server.ws_path 与内置路由冲突: {}", self.server.ws_path);
        }
        if self.relay.retry_interval_secs == 0 {
            bail!("relay.retry_interval_secs 必须大于 0");
        }
        if self.relay.queue.overflow == OverflowPolicy::DropOldest
            && self.relay.queue.max_messages_per_identity == 0
        {
            bail!("relay.queue.max_messages_per_identity 必须大于 0（overflow = drop_oldest）");
        }
        if self.relay.queue.max_age_secs == Some(0) {
            bail!("relay.queue.max_age_secs 必须大于 0");
        }
        Ok(())
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // 1. 从配置文件加载（如果指定）
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                tracing::warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::new()
            }
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            info!("📄 从默认配置文件加载: {}", DEFAULT_CONFIG_FILE);
            Self::from_toml_file(DEFAULT_CONFIG_FILE)?
        } else {
            Self::new()
        };

        // 2. 从环境变量合并（优先级高于配置文件）
        config.merge_from_env()?;

        // 3. 从命令行参数合并（最高优先级）
        config.merge_from_cli(cli);

        config.validate()?;
        Ok(config)
    }
}

/// 解析 snake_case 枚举值
fn parse_enum<T: DeserializeOwned>(value: &str, key: &str) -> Result<T> {
    let deserializer: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
        value.into_deserializer();
    T::deserialize(deserializer).with_context(|| format!("{}{} 无效: {}", ENV_PREFIX, key, value))
}

/// 默认配置文件内容
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Chat Relay 配置文件
# 此文件由 chat-relay generate-config 生成

[server]
host = "0.0.0.0"
port = 3000
ws_path = "/ws"

[relay]
# 离线消息重试扫描间隔（秒）
retry_interval_secs = 5
# get users 的回复范围: broadcast / requester
users_list_scope = "broadcast"
# 同一身份在新连接上重新声明时旧连接的处理: keep_orphaned / close_orphaned
rebind_policy = "keep_orphaned"
# 离线补发的事件名: original（一律 messageSent，通知带 type 字段）/ typed（保留各自事件名）
flush_event_names = "original"

[relay.queue]
# 队列满时的处理: drop_oldest / unbounded
overflow = "drop_oldest"
max_messages_per_identity = 500
# max_age_secs = 86400

[logging]
level = "info"
format = "compact"
# file = "./logs/relay.log"

[metrics]
enabled = false
"#;
