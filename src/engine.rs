//! The query operation handed to callers: search the fastest mirror, then fetch.

use crate::backends;
use crate::config::Settings;
use crate::error::Result;
use crate::fetch::FetchCoordinator;
use crate::registry::MirrorRegistry;
use crate::search::SearchClient;
use crate::traits::{HttpFetch, ImageDecoder};
use crate::types::FetchOutcome;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ImageSearch {
    search: SearchClient,
    fetch: FetchCoordinator,
    max_results: usize,
}

impl ImageSearch {
    pub fn new(
        settings: &Settings,
        transport: Arc<dyn HttpFetch>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Self {
        let registry = Arc::new(MirrorRegistry::new(settings.mirrors.clone()));
        Self {
            search: SearchClient::new(transport.clone(), registry),
            fetch: FetchCoordinator::new(transport, decoder, settings.fetch_budget()),
            max_results: settings.max_results,
        }
    }

    /// Engine backed by the real HTTP client and image decoder.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            settings,
            backends::build_transport(settings)?,
            backends::build_decoder(),
        ))
    }

    pub fn search_client(&self) -> &SearchClient {
        &self.search
    }

    pub fn registry(&self) -> &Arc<MirrorRegistry> {
        self.search.registry()
    }

    /// Clamp a caller's result hint to `1..=max_results`.
    pub fn effective_limit(&self, hint: usize) -> usize {
        hint.clamp(1, self.max_results)
    }

    /// Answer `text` with at most `limit_hint` images.
    ///
    /// Never fails. No usable mirror, a failed search or a cancelled query all give an
    /// empty outcome.
    pub async fn query(
        &self,
        text: &str,
        limit_hint: usize,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let searched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Query cancelled during search");
                return FetchOutcome::default();
            }
            searched = self.search.search(text) => searched,
        };

        let search = match searched {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(query = text, error = %e, "Search phase failed");
                return FetchOutcome::default();
            }
        };

        let limit = self.effective_limit(limit_hint);
        self.fetch.collect(search, limit, cancel).await
    }
}
