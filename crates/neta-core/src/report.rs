//! End-of-run reporting.
//!
//! Per-subject errors are isolated; the batch-level report aggregates the
//! terminal state of every subject for operator visibility.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::UpsertOutcome;

/// Terminal state of one subject's enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubjectOutcome {
  /// The write transaction committed (possibly as a no-op).
  Committed {
    summary: UpsertOutcome,
    /// Set when any field was sentinel-filled or fallback-supplied.
    needs_verification: bool,
  },
  /// The write transaction aborted; the stored record is untouched.
  RolledBack { reason: String },
  /// Not attempted — the run deadline was reached before this subject.
  Skipped,
}

/// Aggregated outcomes for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
  pub outcomes:          Vec<(String, SubjectOutcome)>,
  pub donations_stored:  usize,
  pub donations_skipped: usize,
}

impl RunReport {
  pub fn record(&mut self, name: String, outcome: SubjectOutcome) {
    self.outcomes.push((name, outcome));
  }

  pub fn committed(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| matches!(o, SubjectOutcome::Committed { .. }))
      .count()
  }

  pub fn no_ops(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| {
        matches!(o, SubjectOutcome::Committed { summary, .. } if summary.is_no_op())
      })
      .count()
  }

  pub fn rolled_back(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| matches!(o, SubjectOutcome::RolledBack { .. }))
      .count()
  }

  pub fn skipped(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| matches!(o, SubjectOutcome::Skipped))
      .count()
  }

  /// Names of subjects that received a fallback or sentinel value this run.
  pub fn needs_verification(&self) -> Vec<&str> {
    self
      .outcomes
      .iter()
      .filter_map(|(name, o)| match o {
        SubjectOutcome::Committed { needs_verification: true, .. } => {
          Some(name.as_str())
        }
        _ => None,
      })
      .collect()
  }
}

impl fmt::Display for RunReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "enrichment run: {} subjects — {} committed ({} no-op), {} rolled back, {} skipped",
      self.outcomes.len(),
      self.committed(),
      self.no_ops(),
      self.rolled_back(),
      self.skipped(),
    )?;
    if self.donations_stored > 0 || self.donations_skipped > 0 {
      writeln!(
        f,
        "donations: {} stored, {} duplicates skipped",
        self.donations_stored, self.donations_skipped,
      )?;
    }
    let unverified = self.needs_verification();
    if !unverified.is_empty() {
      writeln!(f, "needs manual verification:")?;
      for name in unverified {
        writeln!(f, "  - {name}")?;
      }
    }
    for (name, outcome) in &self.outcomes {
      if let SubjectOutcome::RolledBack { reason } = outcome {
        writeln!(f, "rolled back: {name} — {reason}")?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;

  #[test]
  fn counts_and_verification_list() {
    let id = Uuid::new_v4();
    let mut report = RunReport::default();
    report.record("A. Reddy".into(), SubjectOutcome::Committed {
      summary: UpsertOutcome::Inserted { subject_id: id, fields: 9 },
      needs_verification: true,
    });
    report.record("B. Rao".into(), SubjectOutcome::Committed {
      summary: UpsertOutcome::NoOp { subject_id: id },
      needs_verification: false,
    });
    report.record("C. Devi".into(), SubjectOutcome::RolledBack {
      reason: "write conflict".into(),
    });
    report.record("D. Kumar".into(), SubjectOutcome::Skipped);

    assert_eq!(report.committed(), 2);
    assert_eq!(report.no_ops(), 1);
    assert_eq!(report.rolled_back(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.needs_verification(), vec!["A. Reddy"]);

    let rendered = report.to_string();
    assert!(rendered.contains("4 subjects"));
    assert!(rendered.contains("needs manual verification"));
  }
}
