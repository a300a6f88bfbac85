use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统
///
/// 指定日志文件时额外输出到文件（非阻塞写入），
/// 返回的 guard 必须在进程生命周期内持有，否则缓冲日志会丢失。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet { "error" } else { log_level };

    // 解析日志级别（RUST_LOG 优先）
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // 文件输出
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(Path::new(path))?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    // 根据格式选择不同的输出方式
    let result = match log_format {
        // JSON 格式（适合生产环境）
        Some("json") => registry.with(fmt::layer().json()).try_init(),
        // Pretty 格式（适合开发环境）
        Some("pretty") | Some("dev") => registry.with(fmt::layer().pretty()).try_init(),
        // Compact 格式（默认）
        _ => registry.with(fmt::layer().compact()).try_init(),
    };
    result.context("初始化日志系统失败")?;

    Ok(guard)
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("日志文件路径无效: {:?}", path))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(directory)
        .with_context(|| format!("无法创建日志目录: {:?}", directory))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
