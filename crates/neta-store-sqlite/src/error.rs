//! Error type for `neta-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] neta_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A stored column value did not decode back into its domain type.
  #[error("stored value could not be decoded: {0}")]
  Decode(String),

  /// The subject's `updated_at` moved between the pipeline's read and the
  /// write transaction. The transaction was rolled back.
  #[error("write conflict on subject {0:?}: record changed since it was read")]
  WriteConflict(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
