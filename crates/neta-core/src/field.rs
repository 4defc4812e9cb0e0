//! Enrichable fields and their stored values.
//!
//! A field value is overwritten in place (no history is retained) and always
//! carries a provenance tag. Sentinel values mark a field that was checked
//! but for which no source had data, distinct from a field never attempted
//! (which simply has no stored row).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::SourceTier;

// ─── Sentinels ───────────────────────────────────────────────────────────────

/// Stored when every source was consulted and none had a usable value.
pub const TO_BE_VERIFIED: &str = "To be verified";

/// Alternate sentinel reported by sources that answer with an explicit blank.
pub const UNKNOWN: &str = "Unknown";

/// Whether `value` is a "checked, nothing found" marker rather than data.
pub fn is_sentinel(value: &str) -> bool {
  let v = value.trim();
  v.eq_ignore_ascii_case(TO_BE_VERIFIED)
    || v.eq_ignore_ascii_case(UNKNOWN)
    || v.eq_ignore_ascii_case("None identified")
}

// ─── Field ───────────────────────────────────────────────────────────────────

/// One enrichable attribute of a subject.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Field {
  Education,
  Assets,
  Liabilities,
  CriminalCases,
  DynastyStatus,
  WealthCategory,
  PoliticalRelatives,
  ProfileImageUrl,
  KnowledgeCategory,
}

impl Field {
  /// Every enrichable field, in a fixed order. The reconciler iterates this
  /// to guarantee no field is left unconsidered.
  pub const ALL: [Field; 9] = [
    Field::Education,
    Field::Assets,
    Field::Liabilities,
    Field::CriminalCases,
    Field::DynastyStatus,
    Field::WealthCategory,
    Field::PoliticalRelatives,
    Field::ProfileImageUrl,
    Field::KnowledgeCategory,
  ];

  /// The discriminant string stored in the `field` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Education => "education",
      Self::Assets => "assets",
      Self::Liabilities => "liabilities",
      Self::CriminalCases => "criminal_cases",
      Self::DynastyStatus => "dynasty_status",
      Self::WealthCategory => "wealth_category",
      Self::PoliticalRelatives => "political_relatives",
      Self::ProfileImageUrl => "profile_image_url",
      Self::KnowledgeCategory => "knowledge_category",
    }
  }

  pub fn from_discriminant(s: &str) -> Option<Field> {
    Field::ALL.iter().copied().find(|f| f.discriminant() == s)
  }
}

// ─── FieldValue ──────────────────────────────────────────────────────────────

/// A stored field value plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
  pub value:       String,
  /// The source that last supplied this value. Never absent: sentinel fills
  /// are tagged [`SourceTier::Fallback`].
  pub provenance:  SourceTier,
  pub recorded_at: DateTime<Utc>,
}

impl FieldValue {
  pub fn is_sentinel(&self) -> bool { is_sentinel(&self.value) }
}

/// A partial field map produced by a single source query.
pub type FieldMap = BTreeMap<Field, String>;
