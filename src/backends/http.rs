use crate::error::{MirrorError, Result};
use crate::traits::HttpFetch;
use crate::types::HttpReply;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use std::time::Duration;

// 连接超时; 整体超时由 resilience 层负责
const CONNECT_TIMEOUT: u64 = 3;

/// Largest body accepted from any host, search JSON and thumbnails alike.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<HttpReply> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let final_url = response.url().to_string();
        if let Some(length) = response.content_length() {
            if length > MAX_BODY_BYTES as u64 {
                return Err(MirrorError::FetchFailed(format!(
                    "{final_url}: body of {length} bytes exceeds {MAX_BODY_BYTES}"
                )));
            }
        }
        let body = read_body(response, &final_url, MAX_BODY_BYTES).await?;

        Ok(HttpReply {
            status,
            retry_after,
            url: final_url,
            body,
        })
    }
}

/// Read the body chunk by chunk, giving up once it grows past `limit`.
///
/// A body cut off mid-read counts as a connection failure.
async fn read_body(mut response: Response, url: &str, limit: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| MirrorError::Connection(format!("{url}: reading body: {e}")))?
    {
        if body.len() + chunk.len() > limit {
            return Err(MirrorError::FetchFailed(format!(
                "{url}: body exceeds {limit} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Only the delay-seconds form is understood; an HTTP-date yields `None`.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}
