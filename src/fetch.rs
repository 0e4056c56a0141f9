//! Fan-out over candidate images under a deadline and a result limit.
//!
//! Every candidate gets its own task. A task downloads the thumbnail, decodes its
//! dimensions and, if the aspect ratio fits, takes one of the `limit` result slots.
//! The supervising loop stops as soon as the slots are full, the deadline passes or
//! the caller cancels; in all three cases the shared token is cancelled so the tasks
//! still running give up at their next check.

use crate::error::{MirrorError, Result};
use crate::filter;
use crate::resilience::{Destination, Resilience};
use crate::traits::{HttpFetch, ImageDecoder};
use crate::types::{CandidateImage, FetchOutcome, ImageDescriptor, SearchOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Time left for fetching after the search phase used `spent` of `budget`.
///
/// When the search phase already overran the budget the fetch phase gets the whole
/// budget again instead of nothing.
pub fn fetch_window(budget: Duration, spent: Duration) -> Duration {
    match budget.checked_sub(spent) {
        Some(remaining) if !remaining.is_zero() => remaining,
        _ => budget,
    }
}

pub struct FetchCoordinator {
    transport: Arc<dyn HttpFetch>,
    decoder: Arc<dyn ImageDecoder>,
    resilience: Resilience,
    budget: Duration,
}

/// State shared by the workers of one fan-out.
struct Shared {
    transport: Arc<dyn HttpFetch>,
    decoder: Arc<dyn ImageDecoder>,
    resilience: Resilience,
    token: CancellationToken,
    limit: usize,
    accepted_count: AtomicUsize,
    accepted: Mutex<Vec<ImageDescriptor>>,
}

impl Shared {
    fn new(coordinator: &FetchCoordinator, token: CancellationToken, limit: usize) -> Self {
        Self {
            transport: coordinator.transport.clone(),
            decoder: coordinator.decoder.clone(),
            resilience: coordinator.resilience,
            token,
            limit,
            accepted_count: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// Take a result slot; fails once `limit` slots are taken.
    fn reserve_slot(&self) -> bool {
        self.accepted_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn is_full(&self) -> bool {
        self.accepted_count.load(Ordering::Acquire) >= self.limit
    }
}

impl FetchCoordinator {
    pub fn new(
        transport: Arc<dyn HttpFetch>,
        decoder: Arc<dyn ImageDecoder>,
        budget: Duration,
    ) -> Self {
        Self {
            transport,
            decoder,
            resilience: Resilience::for_destination(Destination::ContentHost),
            budget,
        }
    }

    /// Inspect the candidates of `search` and keep at most `limit` acceptable images.
    ///
    /// Never fails: individual download or decode errors only cost their candidate.
    pub async fn collect(
        &self,
        search: SearchOutcome,
        limit: usize,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let SearchOutcome {
            candidate_count,
            mirror,
            candidates,
            elapsed,
        } = search;

        let limit = limit.max(1);
        let window = fetch_window(self.budget, elapsed);
        let shared = Arc::new(Shared::new(self, cancel.child_token(), limit));

        if !candidates.is_empty() {
            tracing::debug!(
                candidates = candidates.len(),
                limit,
                window_ms = window.as_millis() as u64,
                "Fetching candidates"
            );
            self.supervise(&shared, candidates, Instant::now() + window)
                .await;
        }

        let accepted = match shared.accepted.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        tracing::info!(
            candidates = candidate_count,
            accepted = accepted.len(),
            "Fetch finished"
        );

        FetchOutcome {
            candidate_count,
            mirror,
            accepted,
        }
    }

    async fn supervise(
        &self,
        shared: &Arc<Shared>,
        candidates: Vec<CandidateImage>,
        deadline: Instant,
    ) {
        let mut workers = JoinSet::new();
        for candidate in candidates {
            workers.spawn(inspect(shared.clone(), candidate));
        }

        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                biased;
                _ = shared.token.cancelled() => {
                    tracing::debug!("Fetch cancelled by caller");
                    break;
                }
                _ = &mut expired => {
                    tracing::debug!("Fetch deadline reached");
                    break;
                }
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {
                        if shared.is_full() {
                            tracing::debug!(limit = shared.limit, "Enough images, stopping early");
                            break;
                        }
                    }
                    Some(Ok(Err(MirrorError::Cancelled))) => {}
                    Some(Ok(Err(e))) => {
                        tracing::debug!(error = %e, "Candidate dropped");
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Fetch worker panicked");
                    }
                },
            }
        }

        // 通知仍在运行的任务; 未完成的网络请求不再等待
        shared.token.cancel();
        workers.abort_all();
    }
}

/// One worker: download, decode, filter, then take a slot.
///
/// Cancellation is checked before the download starts, while it is in flight, and
/// after decoding.
async fn inspect(shared: Arc<Shared>, candidate: CandidateImage) -> Result<()> {
    if shared.token.is_cancelled() || shared.is_full() {
        return Err(MirrorError::Cancelled);
    }

    let url = candidate.thumbnail;
    let transport = &shared.transport;
    let download = shared.resilience.call(|| transport.get(&url));
    let reply = tokio::select! {
        biased;
        _ = shared.token.cancelled() => return Err(MirrorError::Cancelled),
        reply = download => reply?,
    };

    if !reply.is_success() {
        return Err(MirrorError::FetchFailed(format!(
            "{} answered {}",
            url, reply.status
        )));
    }

    let resolved = reply.url;
    let decoded = shared
        .decoder
        .decode(reply.body)
        .await
        .map_err(|e| MirrorError::FetchFailed(format!("{resolved}: {e}")))?;
    if shared.token.is_cancelled() {
        return Err(MirrorError::Cancelled);
    }

    if !filter::accepts(decoded.width, decoded.height) {
        tracing::trace!(
            url = %resolved,
            width = decoded.width,
            height = decoded.height,
            "Aspect ratio out of band"
        );
        return Ok(());
    }

    if !shared.reserve_slot() {
        return Err(MirrorError::Cancelled);
    }
    let descriptor = ImageDescriptor {
        url: resolved,
        format: decoded.format,
        alt: candidate.alt,
        width: decoded.width,
        height: decoded.height,
    };
    match shared.accepted.lock() {
        Ok(mut guard) => guard.push(descriptor),
        Err(poisoned) => poisoned.into_inner().push(descriptor),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDecoder, FakeTransport, SlowDecoder};
    use reqwest::StatusCode;

    fn outcome(thumbnails: &[&str], elapsed: Duration) -> SearchOutcome {
        let candidates: Vec<_> = thumbnails
            .iter()
            .map(|t| CandidateImage::new(t, Some("alt")))
            .collect();
        SearchOutcome {
            candidate_count: candidates.len(),
            mirror: Some("https://m.test".to_string()),
            candidates,
            elapsed,
        }
    }

    fn coordinator(transport: FakeTransport, budget_secs: u64) -> (FetchCoordinator, Arc<FakeTransport>) {
        let transport = Arc::new(transport);
        let coordinator = FetchCoordinator::new(
            transport.clone(),
            Arc::new(FakeDecoder),
            Duration::from_secs(budget_secs),
        );
        (coordinator, transport)
    }

    #[test]
    fn test_fetch_window_subtracts_search_time() {
        assert_eq!(
            fetch_window(Duration::from_secs(5), Duration::from_secs(2)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_fetch_window_leniency_when_search_overran() {
        assert_eq!(
            fetch_window(Duration::from_secs(5), Duration::from_secs(7)),
            Duration::from_secs(5)
        );
        assert_eq!(
            fetch_window(Duration::from_secs(5), Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_affect_siblings() {
        let transport = FakeTransport::new()
            .route("img.test/ok1", StatusCode::OK, "800x600:png")
            .route("img.test/ok2", StatusCode::OK, "600x800")
            .route("img.test/missing", StatusCode::NOT_FOUND, "")
            .route("img.test/garbage", StatusCode::OK, "<html>")
            .route("img.test/strip", StatusCode::OK, "3000x300");
        let (coordinator, _) = coordinator(transport, 5);

        let search = outcome(
            &[
                "https://img.test/ok1",
                "https://img.test/missing",
                "https://img.test/garbage",
                "https://down.test/refused",
                "https://img.test/strip",
                "https://img.test/ok2",
            ],
            Duration::from_millis(200),
        );
        let result = coordinator
            .collect(search, 10, &CancellationToken::new())
            .await;

        assert_eq!(result.candidate_count, 6);
        assert_eq!(result.mirror.as_deref(), Some("https://m.test"));
        let mut urls: Vec<_> = result.accepted.iter().map(|d| d.url.as_str()).collect();
        urls.sort();
        assert_eq!(urls, vec!["https://img.test/ok1", "https://img.test/ok2"]);

        let ok1 = result
            .accepted
            .iter()
            .find(|d| d.url.ends_with("ok1"))
            .unwrap();
        assert_eq!(ok1.format.as_deref(), Some("png"));
        assert_eq!(ok1.alt.as_deref(), Some("alt"));
        assert_eq!((ok1.width, ok1.height), (800, 600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_limit_and_cancels_the_rest() {
        let mut transport = FakeTransport::new();
        for i in 0..4 {
            transport = transport.route(&format!("fast.test/{i}"), StatusCode::OK, "100x100");
        }
        for i in 0..4 {
            transport = transport.slow_route(
                &format!("slow.test/{i}"),
                Duration::from_secs(3),
                StatusCode::OK,
                "100x100",
            );
        }
        let (coordinator, transport) = coordinator(transport, 10);

        let thumbnails: Vec<String> = (0..4)
            .map(|i| format!("https://fast.test/{i}"))
            .chain((0..4).map(|i| format!("https://slow.test/{i}")))
            .collect();
        let refs: Vec<&str> = thumbnails.iter().map(String::as_str).collect();

        let start = Instant::now();
        let result = coordinator
            .collect(outcome(&refs, Duration::ZERO), 3, &CancellationToken::new())
            .await;

        assert_eq!(result.accepted.len(), 3);
        assert!(start.elapsed() < Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.completed("slow.test"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_results() {
        let transport = FakeTransport::new()
            .route("img.test/quick", StatusCode::OK, "400x300")
            .slow_route("img.test/late", Duration::from_secs(8), StatusCode::OK, "400x300");
        let (coordinator, _) = coordinator(transport, 5);

        let start = Instant::now();
        let result = coordinator
            .collect(
                outcome(&["https://img.test/quick", "https://img.test/late"], Duration::from_secs(1)),
                5,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.accepted.len(), 1);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(4));
        assert!(waited < Duration::from_millis(4100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation_stops_fetching() {
        let transport = FakeTransport::new().slow_route(
            "img.test/",
            Duration::from_secs(2),
            StatusCode::OK,
            "400x300",
        );
        let (coordinator, transport) = coordinator(transport, 5);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = coordinator
            .collect(
                outcome(&["https://img.test/a", "https://img.test/b"], Duration::ZERO),
                5,
                &cancel,
            )
            .await;

        assert!(result.accepted.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(transport.completed("img.test"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_decoding_takes_no_slot() {
        let transport = Arc::new(FakeTransport::new().route("img.test/a", StatusCode::OK, "400x300"));
        let decoder = Arc::new(SlowDecoder::new(Duration::from_secs(1)));
        let coordinator =
            FetchCoordinator::new(transport.clone(), decoder.clone(), Duration::from_secs(5));
        let shared = Arc::new(Shared::new(&coordinator, CancellationToken::new(), 5));

        let worker = tokio::spawn(inspect(
            shared.clone(),
            CandidateImage::new("https://img.test/a", None),
        ));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        shared.token.cancel();

        let result = worker.await.unwrap();

        assert!(matches!(result, Err(MirrorError::Cancelled)));
        assert_eq!(transport.completed("img.test/a"), 1);
        assert_eq!(shared.accepted_count.load(Ordering::Acquire), 0);
        assert!(shared.accepted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_already_cancelled_starts_nothing() {
        let transport = FakeTransport::new().route("img.test/", StatusCode::OK, "400x300");
        let (coordinator, _) = coordinator(transport, 5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = coordinator
            .collect(outcome(&["https://img.test/a"], Duration::ZERO), 5, &cancel)
            .await;

        assert!(result.accepted.is_empty());
        assert_eq!(result.candidate_count, 1);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let (coordinator, _) = coordinator(FakeTransport::new(), 5);

        let result = coordinator
            .collect(SearchOutcome::empty(Duration::ZERO), 5, &CancellationToken::new())
            .await;

        assert!(result.accepted.is_empty());
        assert_eq!(result.mirror, None);
    }
}
