use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 搜索结果中的候选图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateImage {
    pub thumbnail: String,
    pub alt: Option<String>,
}

impl CandidateImage {
    pub fn new(thumbnail: &str, alt: Option<&str>) -> Self {
        Self {
            thumbnail: thumbnail.to_string(),
            alt: alt.map(str::to_string),
        }
    }
}

/// An image that was downloaded, decoded and passed the aspect-ratio filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageDescriptor {
    /// Locator after redirects
    pub url: String,
    pub format: Option<String>,
    pub alt: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// What the decoder reports for a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Number of unique candidates, before any image is inspected
    pub candidate_count: usize,
    /// 实际提供结果的镜像 (空查询时为 None)
    pub mirror: Option<String>,
    pub candidates: Vec<CandidateImage>,
    pub elapsed: Duration,
}

impl SearchOutcome {
    pub fn empty(elapsed: Duration) -> Self {
        Self {
            elapsed,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchOutcome {
    pub candidate_count: usize,
    pub mirror: Option<String>,
    /// Unordered
    pub accepted: Vec<ImageDescriptor>,
}

/// A fully read HTTP response, as seen by the retry layers.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    /// Parsed `Retry-After`, if the server sent one in seconds
    pub retry_after: Option<Duration>,
    /// Final URL after redirects
    pub url: String,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: StatusCode, url: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            retry_after: None,
            url: url.to_string(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// 测速结果
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub address: String,
    /// Number of canary results; `None` when the probe failed
    pub results: Option<usize>,
    pub latency: Duration,
}

impl ProbeReport {
    pub fn is_usable(&self) -> bool {
        matches!(self.results, Some(n) if n > 0)
    }
}
