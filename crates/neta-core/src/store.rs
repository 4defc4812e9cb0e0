//! The `RecordStore` trait and the upsert contract.
//!
//! The trait is implemented by storage backends (e.g. `neta-store-sqlite`).
//! The pipeline and the CLI depend on this abstraction, not on any concrete
//! backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  donation::{Donation, NewDonation},
  field::Field,
  reconcile::Reconciled,
  subject::{NewSubject, StoredRecord, SubjectIdentity},
};

// ─── Upsert types ────────────────────────────────────────────────────────────

/// Input to [`RecordStore::upsert`].
#[derive(Debug, Clone)]
pub struct UpsertRequest {
  pub identity:   SubjectIdentity,
  pub reconciled: Reconciled,
  /// The subject's `updated_at` as observed when the record was read at the
  /// start of the run; `None` for a subject not yet stored. If the stored
  /// timestamp has moved by write time, the transaction aborts with a write
  /// conflict instead of clobbering a concurrent run's work.
  pub expected_updated_at: Option<DateTime<Utc>>,
}

/// Summary of what an upsert changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
  /// The subject did not exist; a new row plus all field values were written.
  Inserted { subject_id: Uuid, fields: usize },
  /// Only the listed fields differed from their stored values.
  Updated { subject_id: Uuid, fields: Vec<Field> },
  /// Nothing differed; no row was touched and `updated_at` is unchanged.
  NoOp { subject_id: Uuid },
}

impl UpsertOutcome {
  pub fn subject_id(&self) -> Uuid {
    match self {
      Self::Inserted { subject_id, .. }
      | Self::Updated { subject_id, .. }
      | Self::NoOp { subject_id } => *subject_id,
    }
  }

  pub fn is_no_op(&self) -> bool { matches!(self, Self::NoOp { .. }) }
}

/// Outcome of a donation insert attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DonationOutcome {
  Inserted { donation_id: Uuid },
  /// The (subject, donor, year) natural key already exists. Not an error.
  DuplicateSkipped,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Neta record store backend.
///
/// Field values are overwritten in place; donations are append-only. All
/// multi-statement writes for one subject happen inside a single
/// transaction — a failure partway rolls back fully.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Subjects ──────────────────────────────────────────────────────────

  /// Create and persist a new subject with no field values.
  fn create_subject(
    &self,
    input: NewSubject,
  ) -> impl Future<Output = Result<StoredRecord, Self::Error>> + Send + '_;

  /// Retrieve a subject by surrogate id. Returns `None` if not found.
  fn get_subject(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<StoredRecord>, Self::Error>> + Send + '_;

  /// Look a subject up by name: exact (case-insensitive) match first, then
  /// a substring match. Returns `None` if neither matches.
  fn find_by_name<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<StoredRecord>, Self::Error>> + Send + 'a;

  /// All subjects, with their field maps.
  fn list_subjects(
    &self,
  ) -> impl Future<Output = Result<Vec<StoredRecord>, Self::Error>> + Send + '_;

  /// Subjects with at least one missing or sentinel-valued field.
  fn subjects_needing_enrichment(
    &self,
  ) -> impl Future<Output = Result<Vec<StoredRecord>, Self::Error>> + Send + '_;

  // ── Upsert ────────────────────────────────────────────────────────────

  /// Transactionally persist a reconciled field map.
  ///
  /// Inserts the subject if absent; otherwise writes only fields whose
  /// reconciled (value, provenance) differs from what is stored, so an
  /// unchanged record never touches `updated_at`.
  fn upsert(
    &self,
    request: UpsertRequest,
  ) -> impl Future<Output = Result<UpsertOutcome, Self::Error>> + Send + '_;

  // ── Donations ─────────────────────────────────────────────────────────

  /// Append a donation fact after an existence check on the natural key
  /// (subject, donor_name, year); a collision is skipped, not an error.
  fn insert_donation(
    &self,
    subject_id: Uuid,
    donation: NewDonation,
  ) -> impl Future<Output = Result<DonationOutcome, Self::Error>> + Send + '_;

  /// All stored donations for a subject.
  fn donations_for(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Donation>, Self::Error>> + Send + '_;
}
