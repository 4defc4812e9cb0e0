//! Priority reconciliation — merging multi-source results into one field map.
//!
//! The reconciler owns no I/O. Given the existing stored record and the
//! sequence of source results (in query order), it decides field by field
//! whether to accept a new value, keep the stored one, or flag a conflict.
//! A value already stored from a higher- or equal-priority source is never
//! downgraded, and a `Failed` source can never clear good data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  field::{self, Field, TO_BE_VERIFIED},
  source::{SourceResult, SourceTier},
  subject::StoredRecord,
  Error, Result,
};

// ─── Output types ────────────────────────────────────────────────────────────

/// How a field's reconciled value was arrived at.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
  /// A newly accepted value from this run's source results.
  Accepted,
  /// The previously stored value won (or no source had anything newer).
  Kept,
  /// No source had data and nothing was stored; the sentinel was filled in.
  SentinelFilled,
}

/// One field's reconciled outcome, with the provenance the writer persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledField {
  pub value:       String,
  pub provenance:  SourceTier,
  pub disposition: Disposition,
}

/// A candidate value that lost to a higher- or equal-priority one while
/// disagreeing with it. Surfaced for operator visibility, never acted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
  pub field:          Field,
  pub accepted_from:  SourceTier,
  pub rejected_from:  SourceTier,
  pub rejected_value: String,
}

/// The merged field map plus everything the writer and report need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciled {
  /// One entry per enrichable field — never a partial map.
  pub fields:    BTreeMap<Field, ReconciledField>,
  pub conflicts: Vec<Conflict>,
}

impl Reconciled {
  /// True when any field was sentinel-filled or supplied by the fallback
  /// source; such subjects are flagged for manual verification.
  pub fn needs_verification(&self) -> bool {
    self
      .fields
      .values()
      .any(|f| f.provenance == SourceTier::Fallback)
  }
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

/// Field-by-field merge under an explicit, immutable priority order.
///
/// The order is injected at construction rather than read from a global so
/// test suites can run with mock orders. Ties between sources at the same
/// tier are broken deterministically: first in query order wins.
#[derive(Debug, Clone)]
pub struct Reconciler {
  priority: Vec<SourceTier>,
}

impl Reconciler {
  /// `priority` is the descending trust order. It must be non-empty and
  /// free of duplicates; tiers left out rank below every listed tier.
  pub fn new(priority: Vec<SourceTier>) -> Result<Self> {
    if priority.is_empty() {
      return Err(Error::EmptyPriority);
    }
    for (i, tier) in priority.iter().enumerate() {
      if priority[..i].contains(tier) {
        return Err(Error::DuplicatePriority(*tier));
      }
    }
    Ok(Self { priority })
  }

  /// The production order: Database > Registry > Knowledge > Fallback.
  pub fn with_default_priority() -> Self {
    Self { priority: SourceTier::DEFAULT_PRIORITY.to_vec() }
  }

  pub fn priority(&self) -> &[SourceTier] { &self.priority }

  /// Rank of `tier` in the priority order; lower is more trusted.
  fn rank(&self, tier: SourceTier) -> usize {
    self
      .priority
      .iter()
      .position(|t| *t == tier)
      .unwrap_or(self.priority.len())
  }

  /// Merge `results` (in query order) with the existing stored record.
  ///
  /// `Failed` and `NotFound` results contribute no candidates, so a failed
  /// source can never clear or downgrade a stored value. Every field in
  /// [`Field::ALL`] appears in the output; fields with no value from any
  /// source and nothing stored receive the [`TO_BE_VERIFIED`] sentinel,
  /// tagged [`SourceTier::Fallback`].
  pub fn reconcile(
    &self,
    existing: Option<&StoredRecord>,
    results: &[(SourceTier, SourceResult)],
  ) -> Reconciled {
    let mut fields = BTreeMap::new();
    let mut conflicts = Vec::new();

    for field in Field::ALL {
      // Candidates in query order: non-empty, non-sentinel values from
      // sources that actually found data.
      let mut candidates: Vec<(SourceTier, &str)> = Vec::new();
      for (tier, result) in results {
        if let SourceResult::Found(map) = result
          && let Some(value) = map.get(&field)
        {
          let value = value.trim();
          if !value.is_empty() && !field::is_sentinel(value) {
            candidates.push((*tier, value));
          }
        }
      }

      // Best candidate: strictly-higher trust beats earlier entries, so a
      // same-rank tie is won by the earlier-queried source.
      let mut best: Option<(usize, SourceTier, &str)> = None;
      for (idx, (tier, value)) in candidates.iter().copied().enumerate() {
        let better = match best {
          None => true,
          Some((_, b, _)) => self.rank(tier) < self.rank(b),
        };
        if better {
          best = Some((idx, tier, value));
        }
      }

      let stored = existing.and_then(|r| r.fields.get(&field));

      let outcome = match (stored, best) {
        (Some(s), Some((best_idx, tier, value))) => {
          if s.value.trim() == value {
            // Same value; keep the stored row and its original provenance.
            ReconciledField {
              value:       s.value.clone(),
              provenance:  s.provenance,
              disposition: Disposition::Kept,
            }
          } else if !s.is_sentinel() && self.rank(s.provenance) <= self.rank(tier)
          {
            // No downgrade: the stored value came from an equal or more
            // trusted source than anything found this run.
            conflicts.push(Conflict {
              field,
              accepted_from:  s.provenance,
              rejected_from:  tier,
              rejected_value: value.to_owned(),
            });
            ReconciledField {
              value:       s.value.clone(),
              provenance:  s.provenance,
              disposition: Disposition::Kept,
            }
          } else {
            self.note_losers(&mut conflicts, field, &candidates, best_idx);
            ReconciledField {
              value:       value.to_owned(),
              provenance:  tier,
              disposition: Disposition::Accepted,
            }
          }
        }
        (None, Some((best_idx, tier, value))) => {
          self.note_losers(&mut conflicts, field, &candidates, best_idx);
          ReconciledField {
            value:       value.to_owned(),
            provenance:  tier,
            disposition: Disposition::Accepted,
          }
        }
        (Some(s), None) => ReconciledField {
          value:       s.value.clone(),
          provenance:  s.provenance,
          disposition: Disposition::Kept,
        },
        (None, None) => ReconciledField {
          value:       TO_BE_VERIFIED.to_owned(),
          provenance:  SourceTier::Fallback,
          disposition: Disposition::SentinelFilled,
        },
      };

      fields.insert(field, outcome);
    }

    Reconciled { fields, conflicts }
  }

  /// Flag every candidate that disagreed with the accepted value.
  fn note_losers(
    &self,
    conflicts: &mut Vec<Conflict>,
    field: Field,
    candidates: &[(SourceTier, &str)],
    accepted_idx: usize,
  ) {
    let (accepted_tier, accepted_value) = candidates[accepted_idx];
    for (idx, (tier, value)) in candidates.iter().copied().enumerate() {
      if idx != accepted_idx && value != accepted_value {
        conflicts.push(Conflict {
          field,
          accepted_from:  accepted_tier,
          rejected_from:  tier,
          rejected_value: value.to_owned(),
        });
      }
    }
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use chrono::Utc;
  use uuid::Uuid;

  use super::*;
  use crate::{
    field::{FieldMap, FieldValue, UNKNOWN},
    source::SourceFailure,
  };

  fn reconciler() -> Reconciler { Reconciler::with_default_priority() }

  fn found(pairs: &[(Field, &str)]) -> SourceResult {
    let map: FieldMap = pairs
      .iter()
      .map(|(f, v)| (*f, (*v).to_owned()))
      .collect();
    SourceResult::Found(map)
  }

  fn record_with(pairs: &[(Field, &str, SourceTier)]) -> StoredRecord {
    let mut fields = BTreeMap::new();
    for (f, v, tier) in pairs {
      fields.insert(*f, FieldValue {
        value:       (*v).to_owned(),
        provenance:  *tier,
        recorded_at: Utc::now(),
      });
    }
    StoredRecord {
      subject_id: Uuid::new_v4(),
      name: "A. Reddy".into(),
      party: Some("YSRCP".into()),
      constituency: None,
      state: Some("Andhra Pradesh".into()),
      fields,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  #[test]
  fn priority_order_must_be_valid() {
    assert!(matches!(
      Reconciler::new(vec![]).unwrap_err(),
      Error::EmptyPriority
    ));
    assert!(matches!(
      Reconciler::new(vec![SourceTier::Registry, SourceTier::Registry])
        .unwrap_err(),
      Error::DuplicatePriority(SourceTier::Registry)
    ));
  }

  #[test]
  fn brand_new_subject_merges_across_tiers() {
    // Database: NotFound; Registry has education; Knowledge has dynasty.
    let results = vec![
      (SourceTier::Database, SourceResult::NotFound),
      (SourceTier::Registry, found(&[(Field::Education, "BA")])),
      (
        SourceTier::Knowledge,
        found(&[(Field::DynastyStatus, "Self-Made")]),
      ),
    ];

    let merged = reconciler().reconcile(None, &results);

    let education = &merged.fields[&Field::Education];
    assert_eq!(education.value, "BA");
    assert_eq!(education.provenance, SourceTier::Registry);
    assert_eq!(education.disposition, Disposition::Accepted);

    let dynasty = &merged.fields[&Field::DynastyStatus];
    assert_eq!(dynasty.value, "Self-Made");
    assert_eq!(dynasty.provenance, SourceTier::Knowledge);

    // Every other field carries the sentinel, tagged fallback.
    let assets = &merged.fields[&Field::Assets];
    assert_eq!(assets.value, TO_BE_VERIFIED);
    assert_eq!(assets.provenance, SourceTier::Fallback);
    assert_eq!(assets.disposition, Disposition::SentinelFilled);

    assert!(merged.needs_verification());
    // Provenance completeness: one entry per enrichable field.
    assert_eq!(merged.fields.len(), Field::ALL.len());
  }

  #[test]
  fn failed_registry_does_not_downgrade_stored_value() {
    // Stored assets came from the registry; this run the registry failed
    // and the knowledge tier disagrees. Stored value must survive.
    let existing =
      record_with(&[(Field::Assets, "₹5 Crore", SourceTier::Registry)]);
    let results = vec![
      (
        SourceTier::Registry,
        SourceResult::Failed(SourceFailure::Unavailable("timeout".into())),
      ),
      (SourceTier::Knowledge, found(&[(Field::Assets, "₹2 Crore")])),
    ];

    let merged = reconciler().reconcile(Some(&existing), &results);

    let assets = &merged.fields[&Field::Assets];
    assert_eq!(assets.value, "₹5 Crore");
    assert_eq!(assets.provenance, SourceTier::Registry);
    assert_eq!(assets.disposition, Disposition::Kept);

    // The losing knowledge value is flagged, not silently dropped.
    assert_eq!(merged.conflicts.len(), 1);
    assert_eq!(merged.conflicts[0].rejected_from, SourceTier::Knowledge);
    assert_eq!(merged.conflicts[0].rejected_value, "₹2 Crore");
  }

  #[test]
  fn failed_source_never_clears_existing_field() {
    let existing =
      record_with(&[(Field::Education, "LLB", SourceTier::Knowledge)]);
    let results = vec![(
      SourceTier::Knowledge,
      SourceResult::Failed(SourceFailure::ParseFailure("garbage".into())),
    )];

    let merged = reconciler().reconcile(Some(&existing), &results);
    assert_eq!(merged.fields[&Field::Education].value, "LLB");
    assert_eq!(
      merged.fields[&Field::Education].disposition,
      Disposition::Kept
    );
  }

  #[test]
  fn higher_priority_result_replaces_lower_priority_stored_value() {
    let existing =
      record_with(&[(Field::Assets, "₹2 Crore", SourceTier::Knowledge)]);
    let results =
      vec![(SourceTier::Registry, found(&[(Field::Assets, "₹5 Crore")]))];

    let merged = reconciler().reconcile(Some(&existing), &results);
    let assets = &merged.fields[&Field::Assets];
    assert_eq!(assets.value, "₹5 Crore");
    assert_eq!(assets.provenance, SourceTier::Registry);
    assert_eq!(assets.disposition, Disposition::Accepted);
  }

  #[test]
  fn database_echo_shields_stored_value_from_later_tiers() {
    // The database tier reports the stored value back at the top rank, so
    // a disagreeing registry result loses the candidate race and the
    // stored row keeps its original provenance.
    let existing =
      record_with(&[(Field::Assets, "₹2 Crore", SourceTier::Knowledge)]);
    let results = vec![
      (SourceTier::Database, found(&[(Field::Assets, "₹2 Crore")])),
      (SourceTier::Registry, found(&[(Field::Assets, "₹5 Crore")])),
    ];

    let merged = reconciler().reconcile(Some(&existing), &results);
    let assets = &merged.fields[&Field::Assets];
    assert_eq!(assets.value, "₹2 Crore");
    assert_eq!(assets.provenance, SourceTier::Knowledge);
    assert_eq!(assets.disposition, Disposition::Kept);
  }

  #[test]
  fn same_tier_tie_break_is_first_in_query_order() {
    let results = vec![
      (SourceTier::Knowledge, found(&[(Field::Education, "BA")])),
      (SourceTier::Knowledge, found(&[(Field::Education, "MA")])),
    ];

    let merged = reconciler().reconcile(None, &results);
    assert_eq!(merged.fields[&Field::Education].value, "BA");

    // The later disagreeing same-tier value is recorded as a conflict.
    assert_eq!(merged.conflicts.len(), 1);
    assert_eq!(merged.conflicts[0].rejected_value, "MA");
  }

  #[test]
  fn sentinel_stored_value_is_replaced_by_any_real_value() {
    let existing = record_with(&[(
      Field::PoliticalRelatives,
      TO_BE_VERIFIED,
      SourceTier::Fallback,
    )]);
    let results = vec![(
      SourceTier::Knowledge,
      found(&[(Field::PoliticalRelatives, "Y. S. Rajasekhara Reddy (Father)")]),
    )];

    let merged = reconciler().reconcile(Some(&existing), &results);
    let relatives = &merged.fields[&Field::PoliticalRelatives];
    assert_eq!(relatives.disposition, Disposition::Accepted);
    assert_eq!(relatives.provenance, SourceTier::Knowledge);
  }

  #[test]
  fn sentinel_values_from_sources_are_not_candidates() {
    // A source answering "Unknown" is "checked, nothing found" — it must
    // not overwrite a stored value nor count as data for an empty field.
    let existing =
      record_with(&[(Field::Assets, "₹5 Crore", SourceTier::Knowledge)]);
    let results = vec![
      (SourceTier::Registry, found(&[(Field::Assets, UNKNOWN)])),
      (SourceTier::Registry, found(&[(Field::Education, UNKNOWN)])),
    ];

    let merged = reconciler().reconcile(Some(&existing), &results);
    assert_eq!(merged.fields[&Field::Assets].value, "₹5 Crore");
    assert_eq!(merged.fields[&Field::Education].value, TO_BE_VERIFIED);
  }

  #[test]
  fn rerun_with_same_results_keeps_everything_unchanged() {
    let results =
      vec![(SourceTier::Registry, found(&[(Field::Education, "BA")]))];
    let first = reconciler().reconcile(None, &results);

    // Persisted record as the writer would store it.
    let stored: Vec<(Field, String, SourceTier)> = first
      .fields
      .iter()
      .map(|(f, rf)| (*f, rf.value.clone(), rf.provenance))
      .collect();
    let stored_refs: Vec<(Field, &str, SourceTier)> = stored
      .iter()
      .map(|(f, v, t)| (*f, v.as_str(), *t))
      .collect();
    let existing = record_with(&stored_refs);

    let second = reconciler().reconcile(Some(&existing), &results);
    for (field, rf) in &second.fields {
      assert_ne!(
        rf.disposition,
        Disposition::Accepted,
        "field {field:?} should not change on an identical rerun"
      );
      assert_eq!(rf.value, first.fields[field].value);
      assert_eq!(rf.provenance, first.fields[field].provenance);
    }
  }

  #[test]
  fn equal_value_keeps_original_provenance() {
    // Registry confirms what knowledge already supplied; the stored row is
    // untouched rather than re-tagged.
    let existing =
      record_with(&[(Field::Assets, "₹5 Crore", SourceTier::Knowledge)]);
    let results =
      vec![(SourceTier::Registry, found(&[(Field::Assets, "₹5 Crore")]))];

    let merged = reconciler().reconcile(Some(&existing), &results);
    let assets = &merged.fields[&Field::Assets];
    assert_eq!(assets.disposition, Disposition::Kept);
    assert_eq!(assets.provenance, SourceTier::Knowledge);
  }

  #[test]
  fn injected_priority_order_is_respected() {
    // Invert the usual order: knowledge outranks registry.
    let reconciler = Reconciler::new(vec![
      SourceTier::Knowledge,
      SourceTier::Registry,
    ])
    .unwrap();

    let results = vec![
      (SourceTier::Registry, found(&[(Field::Education, "BA")])),
      (SourceTier::Knowledge, found(&[(Field::Education, "MA")])),
    ];

    let merged = reconciler.reconcile(None, &results);
    assert_eq!(merged.fields[&Field::Education].value, "MA");
    assert_eq!(
      merged.fields[&Field::Education].provenance,
      SourceTier::Knowledge
    );
  }
}
