//! Query the fastest mirror and turn its answer into candidate images.

use crate::error::{MirrorError, Result};
use crate::registry::{CallOutcome, MirrorRegistry};
use crate::resilience::{Destination, Resilience};
use crate::traits::{HttpFetch, MirrorProbe};
use crate::types::{CandidateImage, SearchOutcome};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

/// Throwaway query used to measure mirrors at startup.
pub const CANARY_QUERY: &str = "cat";

/// Body a mirror sends, as plain text, when its own upstream providers all failed.
pub const FALLBACK_FAILURE_MARKER: &str = "Fallback failed";

/// One item of the mirror's JSON array. `url` (the page the image came from) is not used.
#[derive(Debug, Deserialize)]
struct SearchItem {
    thumbnail: String,
    alt: Option<String>,
}

/// Calls a single mirror through the retry layers; also serves as the canary probe.
pub struct MirrorClient {
    transport: Arc<dyn HttpFetch>,
    resilience: Resilience,
}

impl MirrorClient {
    pub fn new(transport: Arc<dyn HttpFetch>) -> Self {
        Self {
            transport,
            resilience: Resilience::for_destination(Destination::SearchMirror),
        }
    }

    /// One search call to `base`. Not deduplicated.
    pub async fn query(&self, base: &str, query: &str) -> Result<Vec<CandidateImage>> {
        let url = search_url(base, query)?;
        let reply = self.resilience.call(|| self.transport.get(&url)).await?;

        if !reply.is_success() {
            return Err(MirrorError::MirrorCallFailed(format!(
                "{} answered {}",
                base, reply.status
            )));
        }
        parse_results(&reply.body)
    }
}

#[async_trait]
impl MirrorProbe for MirrorClient {
    async fn canary(&self, address: &str) -> Result<usize> {
        Ok(self.query(address, CANARY_QUERY).await?.len())
    }
}

pub struct SearchClient {
    mirrors: Arc<MirrorClient>,
    registry: Arc<MirrorRegistry>,
}

impl SearchClient {
    pub fn new(transport: Arc<dyn HttpFetch>, registry: Arc<MirrorRegistry>) -> Self {
        Self {
            mirrors: Arc::new(MirrorClient::new(transport)),
            registry,
        }
    }

    pub fn mirrors(&self) -> &MirrorClient {
        &self.mirrors
    }

    pub fn registry(&self) -> &Arc<MirrorRegistry> {
        &self.registry
    }

    /// Run `query` against the fastest mirror.
    ///
    /// Only an empty registry is an error. A failing mirror is penalized and the
    /// outcome simply carries no candidates.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        let start = Instant::now();
        self.registry.initialize(self.mirrors.clone()).await;

        let query = normalize_query(query)?;
        if query.is_empty() {
            return Ok(SearchOutcome::empty(start.elapsed()));
        }

        let mirror = self.registry.select_fastest()?;
        let call_start = Instant::now();
        let candidates = match self.mirrors.query(mirror.address(), &query).await {
            Ok(found) => {
                mirror.record(CallOutcome::Success(call_start.elapsed()));
                found
            }
            Err(e) => {
                tracing::warn!(mirror = mirror.address(), error = %e, "Search request failed");
                mirror.record(CallOutcome::Failure(call_start.elapsed()));
                Vec::new()
            }
        };

        let candidates = dedupe(candidates);
        tracing::info!(
            mirror = mirror.address(),
            candidates = candidates.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Search finished"
        );

        Ok(SearchOutcome {
            candidate_count: candidates.len(),
            mirror: Some(mirror.address().to_string()),
            candidates,
            elapsed: start.elapsed(),
        })
    }
}

/// `{base}/search?q=<query>&page=0&type=image`
pub fn search_url(base: &str, query: &str) -> Result<String> {
    let endpoint = format!("{}/search", base.trim_end_matches('/'));
    let url = Url::parse_with_params(&endpoint, &[("q", query), ("page", "0"), ("type", "image")])
        .map_err(|e| MirrorError::MirrorCallFailed(format!("bad mirror address {base}: {e}")))?;
    Ok(url.into())
}

pub fn parse_results(body: &[u8]) -> Result<Vec<CandidateImage>> {
    if std::str::from_utf8(body).map(str::trim) == Ok(FALLBACK_FAILURE_MARKER) {
        return Ok(Vec::new());
    }

    let items: Vec<SearchItem> = serde_json::from_slice(body).map_err(|e| {
        MirrorError::MirrorCallFailed(format!("unparseable search response: {e}"))
    })?;
    Ok(items
        .into_iter()
        .map(|item| CandidateImage {
            thumbnail: item.thumbnail,
            alt: item.alt,
        })
        .collect())
}

/// Drop repeated thumbnails, keeping the first occurrence and the original order.
pub fn dedupe(candidates: Vec<CandidateImage>) -> Vec<CandidateImage> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.thumbnail.clone()))
        .collect()
}

/// 去掉首尾空白并合并连续空白
pub fn normalize_query(query: &str) -> Result<String> {
    let re = Regex::new(r"\s+")?;
    Ok(re.replace_all(query.trim(), " ").into_owned())
}
