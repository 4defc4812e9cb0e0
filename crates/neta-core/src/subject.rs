//! Subject — the politician/official record being enriched.
//!
//! The subject's name is the natural key used for matching across sources;
//! the surrogate `subject_id` is assigned at first insert and never reused.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::field::{Field, FieldValue};

/// The identity used to look a subject up across sources. `party` and
/// `state` disambiguate common names; sources that cannot use them simply
/// ignore them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectIdentity {
  pub name:  String,
  pub party: Option<String>,
  pub state: Option<String>,
}

impl SubjectIdentity {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), party: None, state: None }
  }
}

/// Input to [`crate::store::RecordStore::create_subject`].
#[derive(Debug, Clone)]
pub struct NewSubject {
  pub name:         String,
  pub party:        Option<String>,
  pub constituency: Option<String>,
  pub state:        Option<String>,
}

/// A subject row as currently stored, with its enriched field map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
  pub subject_id:   Uuid,
  pub name:         String,
  pub party:        Option<String>,
  pub constituency: Option<String>,
  pub state:        Option<String>,
  /// Field values present in the store. Absent keys were never attempted.
  pub fields:       BTreeMap<Field, FieldValue>,
  pub created_at:   DateTime<Utc>,
  /// Bumped only when an upsert actually writes a field; the optimistic
  /// concurrency check at write time compares against this.
  pub updated_at:   DateTime<Utc>,
}

impl StoredRecord {
  pub fn identity(&self) -> SubjectIdentity {
    SubjectIdentity {
      name:  self.name.clone(),
      party: self.party.clone(),
      state: self.state.clone(),
    }
  }

  /// Fields that still lack a real (non-sentinel) value.
  pub fn unresolved_fields(&self) -> Vec<Field> {
    Field::ALL
      .iter()
      .copied()
      .filter(|f| self.fields.get(f).is_none_or(FieldValue::is_sentinel))
      .collect()
  }
}
