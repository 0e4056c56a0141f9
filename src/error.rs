use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    /// 初始化后没有任何可用镜像
    #[error("No search mirror answered the canary query")]
    NoMirrorsAvailable,

    #[error("Mirror call failed: {0}")]
    MirrorCallFailed(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Call exceeded hard timeout of {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MirrorError {
    /// Whether the transient-fault retry layer should try the call again.
    pub fn is_transient(&self) -> bool {
        match self {
            MirrorError::Connection(_) | MirrorError::Timeout(_) => true,
            // Request: 连接建立后被对端断开或重置
            MirrorError::Http(e) => {
                e.is_connect() || e.is_timeout() || e.is_request() || e.is_body()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
