use crate::error::Result;
use crate::types::{DecodedImage, HttpReply};
use async_trait::async_trait;

/// HttpFetch: 所有出站 HTTP 调用的最小接口
///
/// Implementations return `Ok` for any response that arrived, whatever its status;
/// the retry layers decide what a status means. `Err` is reserved for calls that never
/// produced a response (DNS, connect, read errors).
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpReply>;
}

/// ImageDecoder: 把字节解析为尺寸与格式
#[async_trait]
pub trait ImageDecoder: Send + Sync {
    async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedImage>;
}

/// MirrorProbe: 对镜像发送金丝雀查询
#[async_trait]
pub trait MirrorProbe: Sync + Send {
    /// Run the canary query against `address` and return how many results it produced.
    async fn canary(&self, address: &str) -> Result<usize>;
}
