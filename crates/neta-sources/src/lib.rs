//! Source implementations for the Neta enrichment pipeline.
//!
//! One module per tier: the local database, the public-filings registry
//! scrape, the language-model knowledge query, and the deterministic
//! fallback. The network-backed sources share the [`throttle`] plumbing for
//! rate limiting, timeouts, and bounded retries.

mod database;
mod fallback;
mod knowledge;
mod registry;

pub mod throttle;

pub use database::DatabaseSource;
pub use fallback::FallbackSource;
pub use knowledge::{KnowledgeConfig, KnowledgeSource};
pub use registry::{RegistryConfig, RegistrySource};

use thiserror::Error;

/// Failure while constructing a source (bad client config, bad pattern).
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("http client: {0}")]
  Http(#[from] reqwest::Error),

  #[error("regex: {0}")]
  Regex(#[from] regex::Error),
}
