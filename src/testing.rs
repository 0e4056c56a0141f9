//! Fakes shared by the unit tests.

use crate::error::{MirrorError, Result};
use crate::traits::{HttpFetch, ImageDecoder, MirrorProbe};
use crate::types::{DecodedImage, HttpReply};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn reply(status: StatusCode, body: &[u8]) -> HttpReply {
    HttpReply::new(status, "https://fake.test/", body.to_vec())
}

/// JSON body in the search backend's format.
pub fn search_body(items: &[(&str, Option<&str>)]) -> Vec<u8> {
    let items: Vec<_> = items
        .iter()
        .map(|(thumbnail, alt)| {
            serde_json::json!({
                "thumbnail": thumbnail,
                "url": format!("{thumbnail}/page"),
                "alt": alt,
            })
        })
        .collect();
    serde_json::to_vec(&items).unwrap()
}

/// A call that plays back a fixed list of outcomes.
pub struct ScriptedCall {
    replies: Mutex<VecDeque<Result<HttpReply>>>,
    calls: AtomicUsize,
}

impl ScriptedCall {
    pub fn new(replies: Vec<Result<HttpReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn next(&self) -> Result<HttpReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(MirrorError::Connection("script exhausted".to_string())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct Route {
    pattern: String,
    status: StatusCode,
    body: Vec<u8>,
    delay: Duration,
}

/// Routes requests by substring; unknown URLs fail to connect.
#[derive(Default)]
pub struct FakeTransport {
    routes: Vec<Route>,
    requested: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, pattern: &str, status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        self.slow_route(pattern, Duration::ZERO, status, body)
    }

    pub fn slow_route(
        mut self,
        pattern: &str,
        delay: Duration,
        status: StatusCode,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        self.routes.push(Route {
            pattern: pattern.to_string(),
            status,
            body: body.into(),
            delay,
        });
        self
    }

    pub fn requests(&self, pattern: &str) -> usize {
        self.requested
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.contains(pattern))
            .count()
    }

    pub fn completed(&self, pattern: &str) -> usize {
        self.completed
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.contains(pattern))
            .count()
    }
}

#[async_trait]
impl HttpFetch for FakeTransport {
    async fn get(&self, url: &str) -> Result<HttpReply> {
        self.requested.lock().unwrap().push(url.to_string());

        let route = self
            .routes
            .iter()
            .find(|r| url.contains(r.pattern.as_str()))
            .cloned();
        let Some(route) = route else {
            return Err(MirrorError::Connection(format!("no route to {url}")));
        };

        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }
        self.completed.lock().unwrap().push(url.to_string());
        Ok(HttpReply::new(route.status, url, route.body))
    }
}

/// Decodes bodies of the form `WxH` or `WxH:format`.
pub struct FakeDecoder;

#[async_trait]
impl ImageDecoder for FakeDecoder {
    async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedImage> {
        let text = String::from_utf8(bytes)
            .map_err(|_| MirrorError::FetchFailed("not an image".to_string()))?;
        let (dims, format) = match text.split_once(':') {
            Some((dims, format)) => (dims, Some(format.to_string())),
            None => (text.as_str(), None),
        };
        let (w, h) = dims
            .split_once('x')
            .ok_or_else(|| MirrorError::FetchFailed("not an image".to_string()))?;
        let parse = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| MirrorError::FetchFailed("not an image".to_string()))
        };
        Ok(DecodedImage {
            width: parse(w)?,
            height: parse(h)?,
            format,
        })
    }
}

/// `FakeDecoder` that takes `delay` before answering.
pub struct SlowDecoder {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowDecoder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageDecoder for SlowDecoder {
    async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        FakeDecoder.decode(bytes).await
    }
}

/// Canary answers per address: `(delay, result count)`; `None` means the call fails.
#[derive(Default)]
pub struct FakeProbe {
    answers: HashMap<String, (Duration, Option<usize>)>,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, address: &str, delay_ms: u64, results: Option<usize>) -> Self {
        self.answers.insert(
            address.to_string(),
            (Duration::from_millis(delay_ms), results),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MirrorProbe for FakeProbe {
    async fn canary(&self, address: &str) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, results) = self
            .answers
            .get(address)
            .copied()
            .unwrap_or((Duration::ZERO, None));
        tokio::time::sleep(delay).await;
        results.ok_or_else(|| MirrorError::Connection(format!("{address} unreachable")))
    }
}
