pub mod decoder;
pub mod http;

use crate::config::Settings;
use crate::error::Result;
use crate::traits::{HttpFetch, ImageDecoder};
use std::sync::Arc;

/// Transport used for every outbound call of the engine.
pub fn build_transport(settings: &Settings) -> Result<Arc<dyn HttpFetch>> {
    Ok(Arc::new(http::ReqwestFetcher::new(&settings.user_agent)?))
}

pub fn build_decoder() -> Arc<dyn ImageDecoder> {
    Arc::new(decoder::HeaderDecoder)
}
