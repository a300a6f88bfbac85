use anyhow::{Context, Result};
use chat_relay::{
    cli::{Cli, Commands},
    config::{self, ServerConfig},
    logging, RelayServer,
};
use std::fs;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            Commands::ShowConfig => {
                return show_config(&cli);
            }
        }
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > 环境变量 > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or_else(|| std::env::var("RELAY_LOG_LEVEL").ok())
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli
        .get_log_format()
        .or_else(|| std::env::var("RELAY_LOG_FORMAT").ok())
        .or(early_log.format);
    let log_file = cli
        .log_file
        .clone()
        .or_else(|| std::env::var("RELAY_LOG_FILE").ok())
        .or(early_log.file);

    // guard 持有到进程退出，保证文件日志刷盘
    let _log_guard = logging::init_logging(
        &log_level,
        log_format.as_deref(),
        log_file.as_deref(),
        cli.quiet,
    )?;

    tracing::info!("🚀 Chat Relay starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    // 如果开发模式，应用开发友好设置
    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    tracing::info!("  - Log Level: {}", log_level);
    tracing::info!(
        "  - Log Format: {:?}",
        log_format.as_deref().unwrap_or("compact")
    );
    if let Some(f) = &log_file {
        tracing::info!("  - Log File: {}", f);
    }

    // 运行服务器
    if let Err(e) = RelayServer::new(config).run().await {
        tracing::error!("❌ 服务器运行失败: {}", e);
        tracing::error!("💡 请检查监听地址是否被占用后重试");
        process::exit(1);
    }

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    fs::write(path, config::DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    config
        .validate()
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Listen: {}", config.bind_address());
    println!("  - WebSocket Path: {}", config.server.ws_path);
    println!("  - Retry Interval: {}s", config.relay.retry_interval_secs);
    println!("  - Queue Overflow: {:?}", config.relay.queue.overflow);

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    // 初始化基本日志（用于显示配置）
    let _guard = logging::init_logging("info", None, None, false)?;

    let config = ServerConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
