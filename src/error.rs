use thiserror::Error;

/// 服务器错误类型
///
/// 中继核心（路由、排队、重试）不产生错误：投递尝试即视为成功。
/// 这里只覆盖 I/O 与帧编解码等外围错误；配置加载使用 anyhow。
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
    /// 网络 / I/O 错误
    #[error("Network error: {0}")]
    Network(String),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// 协议错误（无法识别的帧）
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;
