//! Image search that races interchangeable search mirrors.
//!
//! A query goes to the mirror with the lowest recorded latency; the thumbnails it
//! returns are downloaded in parallel, sized by the image header and filtered by aspect
//! ratio until enough images are found or the time budget runs out. Every outbound call
//! goes through the retry policies in [`resilience`].

pub mod backends;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod registry;
pub mod resilience;
pub mod search;
pub mod traits;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;

pub use engine::ImageSearch;
pub use error::{MirrorError, Result};
