//! Retry policies wrapped around every outbound call.
//!
//! A call passes through, from the outside in:
//! 1. a hard timeout over the whole attempt sequence,
//! 2. [`TransientRetry`]: connection failures, 5xx and 408 retried with exponential
//!    backoff and decorrelated jitter,
//! 3. [`RateLimitRetry`]: 429 retried after the server's `Retry-After`,
//! 4. the call itself.
//!
//! The two retry layers only look at the outcome of the attempt they just made, so each
//! one can be driven on its own with a fake call.

use crate::error::{MirrorError, Result};
use crate::types::HttpReply;
use rand::Rng;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

pub const HARD_TIMEOUT: Duration = Duration::from_secs(9);

const RATE_LIMIT_RETRIES: u32 = 2;
const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(1);

const TRANSIENT_RETRIES: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(4);

/// Where a call is going. Hosts that tolerate hammering get shorter backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    ContentHost,
    SearchMirror,
    Messaging,
}

impl Destination {
    pub fn base_delay(self) -> Duration {
        match self {
            Destination::ContentHost => Duration::from_millis(100),
            Destination::SearchMirror => Duration::from_millis(250),
            Destination::Messaging => Duration::from_secs(1),
        }
    }
}

/// Retries `429 Too Many Requests`, sleeping exactly as long as the server asked.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRetry {
    pub max_retries: u32,
    pub fallback_delay: Duration,
}

impl Default for RateLimitRetry {
    fn default() -> Self {
        Self {
            max_retries: RATE_LIMIT_RETRIES,
            fallback_delay: RATE_LIMIT_FALLBACK,
        }
    }
}

impl RateLimitRetry {
    pub async fn run<F, Fut>(self, call: F) -> Result<HttpReply>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<HttpReply>>,
    {
        let mut retries = 0;
        loop {
            let result = call().await;

            let wait = match &result {
                Ok(reply)
                    if reply.status == StatusCode::TOO_MANY_REQUESTS
                        && retries < self.max_retries =>
                {
                    Some(reply.retry_after.unwrap_or(self.fallback_delay))
                }
                _ => None,
            };

            let Some(wait) = wait else {
                return result;
            };

            retries += 1;
            tracing::debug!(
                retry = retries,
                wait_ms = wait.as_millis() as u64,
                "Rate limited, honouring Retry-After"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

/// Retries connection failures, timeouts, `5xx` and `408`.
#[derive(Debug, Clone, Copy)]
pub struct TransientRetry {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl TransientRetry {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            max_retries: TRANSIENT_RETRIES,
            base_delay,
            max_delay: MAX_BACKOFF,
        }
    }

    pub async fn run<F, Fut>(self, call: F) -> Result<HttpReply>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<HttpReply>>,
    {
        let mut attempt = 0;
        let mut previous = self.base_delay;
        loop {
            let result = call().await;
            if attempt >= self.max_retries || !is_transient_outcome(&result) {
                return result;
            }

            let delay = self.backoff(attempt, previous);
            previous = delay;
            attempt += 1;

            match &result {
                Ok(reply) => tracing::debug!(
                    status = reply.status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient server error, backing off"
                ),
                Err(e) => tracing::debug!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off"
                ),
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Exponential floor `base * 2^attempt`, jittered up to three times the previous
    /// delay, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, previous: Duration) -> Duration {
        let exponential = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let ceiling = previous.saturating_mul(3).max(exponential);

        let low = exponential.as_millis() as u64;
        let high = ceiling.as_millis() as u64;
        // ThreadRng 不是 Send, 不能跨 await 持有
        let jittered = if high > low {
            rand::thread_rng().gen_range(low..=high)
        } else {
            low
        };
        Duration::from_millis(jittered).min(self.max_delay)
    }
}

fn is_transient_outcome(result: &Result<HttpReply>) -> bool {
    match result {
        Ok(reply) => {
            reply.status.is_server_error() || reply.status == StatusCode::REQUEST_TIMEOUT
        }
        Err(e) => e.is_transient(),
    }
}

/// The composed policy for one destination class.
#[derive(Debug, Clone, Copy)]
pub struct Resilience {
    pub destination: Destination,
    pub hard_timeout: Duration,
    pub rate_limit: RateLimitRetry,
    pub transient: TransientRetry,
}

impl Resilience {
    pub fn for_destination(destination: Destination) -> Self {
        Self {
            destination,
            hard_timeout: HARD_TIMEOUT,
            rate_limit: RateLimitRetry::default(),
            transient: TransientRetry::new(destination.base_delay()),
        }
    }

    /// Run `op` under both retry layers and the hard timeout.
    pub async fn call<F, Fut>(&self, op: F) -> Result<HttpReply>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<HttpReply>>,
    {
        let rate_limit = self.rate_limit;
        let op = &op;
        let attempts = self.transient.run(move || rate_limit.run(op));

        match tokio::time::timeout(self.hard_timeout, attempts).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    destination = ?self.destination,
                    timeout_ms = self.hard_timeout.as_millis() as u64,
                    "Call hit hard timeout"
                );
                Err(MirrorError::Timeout(self.hard_timeout))
            }
        }
    }
}
