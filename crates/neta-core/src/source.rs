//! Ranked data sources and the query contract they share.
//!
//! Sources are polymorphic over a single capability: `query(identity)`.
//! Each implementation enforces its own rate limit and timeout; exceeding
//! the timeout yields [`SourceResult::Failed`], never an indefinite block.

use std::{future::Future, pin::Pin};

use serde::{Deserialize, Serialize};

use crate::{
  donation::NewDonation,
  field::FieldMap,
  subject::SubjectIdentity,
  Error, Result,
};

// ─── SourceTier ──────────────────────────────────────────────────────────────

/// The four ranked source tiers, named in descending trust order. The actual
/// priority used by a run is injected into the reconciler as configuration;
/// this enum only identifies the tier a result came from.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
  /// Existing records in the local store.
  Database,
  /// A public-filings registry page (MyNeta-style), pattern-extracted.
  Registry,
  /// A language-model knowledge query with a constrained reply grammar.
  Knowledge,
  /// Deterministic placeholders (generated avatars, sentinels).
  Fallback,
}

impl SourceTier {
  /// The production trust order: Database > Registry > Knowledge > Fallback.
  pub const DEFAULT_PRIORITY: [SourceTier; 4] = [
    SourceTier::Database,
    SourceTier::Registry,
    SourceTier::Knowledge,
    SourceTier::Fallback,
  ];

  /// The tag stored in provenance columns.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Database => "database",
      Self::Registry => "registry",
      Self::Knowledge => "knowledge",
      Self::Fallback => "fallback",
    }
  }

  pub fn from_str_tag(s: &str) -> Result<SourceTier> {
    match s {
      "database" => Ok(Self::Database),
      "registry" => Ok(Self::Registry),
      "knowledge" => Ok(Self::Knowledge),
      "fallback" => Ok(Self::Fallback),
      other => Err(Error::UnknownTier(other.to_owned())),
    }
  }
}

// ─── SourceResult ────────────────────────────────────────────────────────────

/// Why a source failed. A failure is never conflated with [`NotFound`]: a
/// transient error must not overwrite good data with a blank.
///
/// [`NotFound`]: SourceResult::NotFound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SourceFailure {
  /// Network error, timeout, or upstream 5xx. Retryable.
  Unavailable(String),
  /// The source replied but the reply did not match the expected grammar.
  /// Logged and treated as absent data; never guessed at.
  ParseFailure(String),
}

/// The outcome of querying one source for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum SourceResult {
  /// The source had data; the map may cover any subset of fields.
  Found(FieldMap),
  /// The source definitively has no record of this subject.
  NotFound,
  /// The query did not complete. Must not be cached as a negative result.
  Failed(SourceFailure),
}

// ─── Source trait ────────────────────────────────────────────────────────────

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A ranked data provider. Boxed futures keep the trait dyn-compatible so a
/// run can hold its source stack as `Vec<Box<dyn Source>>` in query order.
pub trait Source: Send + Sync {
  fn tier(&self) -> SourceTier;

  /// Produce a best-effort partial record for one subject.
  fn query<'a>(
    &'a self,
    identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, SourceResult>;
}

// ─── Donation sources ────────────────────────────────────────────────────────

/// The outcome of querying a source for donation facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum DonationBatch {
  Found(Vec<NewDonation>),
  NotFound,
  Failed(SourceFailure),
}

/// A provider of append-only donation facts.
pub trait DonationSource: Send + Sync {
  fn tier(&self) -> SourceTier;

  fn fetch_donations<'a>(
    &'a self,
    identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, DonationBatch>;
}
