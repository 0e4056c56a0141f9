//! Mirror registry and fastest-mirror selection.
//!
//! The registry is built once per process from the configured addresses: every address
//! gets the canary query concurrently and only the ones that return results become
//! members. After that the member set never changes; each member's latency is replaced
//! after every search (success: observed time, failure: observed time plus a penalty),
//! which is what pushes a failing mirror down the ranking.

use crate::error::{MirrorError, Result};
use crate::traits::MirrorProbe;
use crate::types::ProbeReport;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

/// Added to the observed time of a failed call.
pub const FAILURE_PENALTY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success(Duration),
    Failure(Duration),
}

impl CallOutcome {
    pub fn recorded_latency(self) -> Duration {
        match self {
            CallOutcome::Success(elapsed) => elapsed,
            CallOutcome::Failure(elapsed) => elapsed + FAILURE_PENALTY,
        }
    }
}

/// A registered mirror and the latency of its last call.
#[derive(Debug)]
pub struct MirrorRecord {
    address: String,
    latency_us: AtomicU64,
}

impl MirrorRecord {
    pub fn new(address: &str, latency: Duration) -> Self {
        Self {
            address: address.to_string(),
            latency_us: AtomicU64::new(latency.as_micros() as u64),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us.load(Ordering::Acquire))
    }

    /// Replace the latency if nobody else changed it since we read it.
    ///
    /// Returns `false` when a concurrent update on the same mirror won; the loser is
    /// dropped rather than retried.
    pub fn record(&self, outcome: CallOutcome) -> bool {
        let next = outcome.recorded_latency().as_micros() as u64;
        let previous = self.latency_us.load(Ordering::Acquire);
        let swapped = self
            .latency_us
            .compare_exchange(previous, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        tracing::debug!(
            mirror = %self.address,
            ?outcome,
            latency_ms = next / 1000,
            swapped,
            "Mirror latency updated"
        );
        swapped
    }
}

/// Result of the one probe round, shared by every caller that waits on it.
type ProbeRound = Shared<BoxFuture<'static, Arc<Vec<Arc<MirrorRecord>>>>>;

pub struct MirrorRegistry {
    addresses: Arc<[String]>,
    round: OnceLock<ProbeRound>,
    members: OnceLock<Vec<Arc<MirrorRecord>>>,
}

impl MirrorRegistry {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses: addresses.into(),
            round: OnceLock::new(),
            members: OnceLock::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.members.get().is_some()
    }

    /// Probe every configured address, once per process.
    ///
    /// The probe round runs on its own task, so a caller that stops waiting (a
    /// cancelled query) neither aborts it nor causes a second round; every caller,
    /// concurrent or later, gets the result of the same round.
    pub async fn initialize(&self, probe: Arc<dyn MirrorProbe>) -> &[Arc<MirrorRecord>] {
        if let Some(members) = self.members.get() {
            return members.as_slice();
        }

        let round = self
            .round
            .get_or_init(|| start_round(probe, self.addresses.clone()))
            .clone();
        let members = round.await;
        self.members.get_or_init(|| members.to_vec()).as_slice()
    }

    /// Members in configuration order; empty until initialized.
    pub fn members(&self) -> &[Arc<MirrorRecord>] {
        self.members.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn select_fastest(&self) -> Result<Arc<MirrorRecord>> {
        self.members()
            .iter()
            .min_by_key(|m| m.latency())
            .cloned()
            .ok_or(MirrorError::NoMirrorsAvailable)
    }
}

fn start_round(probe: Arc<dyn MirrorProbe>, addresses: Arc<[String]>) -> ProbeRound {
    let handle = tokio::spawn(async move {
        let reports = probe_all(&*probe, &addresses).await;
        let members: Vec<_> = reports
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| Arc::new(MirrorRecord::new(&r.address, r.latency)))
            .collect();

        if members.is_empty() {
            tracing::warn!(
                configured = addresses.len(),
                "No mirror answered the canary query"
            );
        } else {
            tracing::info!(
                usable = members.len(),
                configured = addresses.len(),
                "Mirror registry ready"
            );
        }
        members
    });

    async move {
        match handle.await {
            Ok(members) => Arc::new(members),
            Err(e) => {
                // 探测任务异常退出时按无可用镜像处理
                tracing::warn!(error = %e, "Probe round did not finish");
                Arc::new(Vec::new())
            }
        }
    }
    .boxed()
    .shared()
}

/// 单个源测速逻辑
pub async fn probe_one(probe: &dyn MirrorProbe, address: &str) -> ProbeReport {
    let start = Instant::now();
    let results = match probe.canary(address).await {
        Ok(count) => {
            if count == 0 {
                tracing::warn!(mirror = address, "Canary returned no results, skipping mirror");
            }
            Some(count)
        }
        Err(e) => {
            tracing::warn!(mirror = address, error = %e, "Canary probe failed");
            None
        }
    };

    ProbeReport {
        address: address.to_string(),
        results,
        latency: start.elapsed(),
    }
}

/// Probe all addresses concurrently; reports keep the input order.
pub async fn probe_all(probe: &dyn MirrorProbe, addresses: &[String]) -> Vec<ProbeReport> {
    let tasks = addresses.iter().map(|a| probe_one(probe, a));
    futures::future::join_all(tasks).await
}
