//! Error types for `neta-core`.

use thiserror::Error;

use crate::source::SourceTier;

#[derive(Debug, Error)]
pub enum Error {
  #[error("priority order must not be empty")]
  EmptyPriority,

  #[error("duplicate tier in priority order: {0:?}")]
  DuplicatePriority(SourceTier),

  #[error("unknown field discriminant: {0:?}")]
  UnknownField(String),

  #[error("unknown source tier: {0:?}")]
  UnknownTier(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
