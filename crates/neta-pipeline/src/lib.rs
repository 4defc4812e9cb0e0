//! The enrichment pipeline: query, reconcile, upsert, report.
//!
//! One [`Pipeline::run`] processes a batch of subjects sequentially. Each
//! subject moves through the same stages — read the stored record, query the
//! source stack in order, reconcile, write transactionally — and a failure
//! in one subject never aborts the batch: it becomes a `RolledBack` entry in
//! the run report and the pipeline moves on.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use neta_core::{
  field::{self, Field},
  reconcile::Reconciler,
  report::{RunReport, SubjectOutcome},
  source::{DonationBatch, DonationSource, Source, SourceResult, SourceTier},
  store::{DonationOutcome, RecordStore, UpsertRequest},
  subject::SubjectIdentity,
};
use tokio::time::{sleep, Instant};

#[cfg(test)] mod tests;

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// Pause between consecutive subjects, on top of per-source throttles.
  pub subject_delay:    Duration,
  /// Wall-clock budget for the whole run. Subjects not yet started when the
  /// deadline passes are reported as skipped, never half-processed.
  pub run_deadline:     Option<Duration>,
  /// Also query donation sources for each committed subject.
  pub enrich_donations: bool,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      subject_delay:    Duration::from_secs(2),
      run_deadline:     None,
      enrich_donations: false,
    }
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct Pipeline<S> {
  store:            Arc<S>,
  sources:          Vec<Box<dyn Source>>,
  donation_sources: Vec<Box<dyn DonationSource>>,
  reconciler:       Reconciler,
  config:           PipelineConfig,
}

impl<S: RecordStore> Pipeline<S> {
  pub fn new(
    store: Arc<S>,
    reconciler: Reconciler,
    config: PipelineConfig,
  ) -> Self {
    Self {
      store,
      sources: Vec::new(),
      donation_sources: Vec::new(),
      reconciler,
      config,
    }
  }

  /// Append a source to the stack. Query order is registration order, which
  /// also decides same-tier ties during reconciliation.
  pub fn with_source(mut self, source: Box<dyn Source>) -> Self {
    self.sources.push(source);
    self
  }

  pub fn with_donation_source(
    mut self,
    source: Box<dyn DonationSource>,
  ) -> Self {
    self.donation_sources.push(source);
    self
  }

  /// Enrich every subject in `identities`, sequentially and independently.
  pub async fn run(&self, identities: &[SubjectIdentity]) -> RunReport {
    let started = Instant::now();
    let mut report = RunReport::default();

    for (index, identity) in identities.iter().enumerate() {
      if let Some(deadline) = self.config.run_deadline
        && started.elapsed() >= deadline
      {
        tracing::warn!(
          remaining = identities.len() - index,
          "run deadline reached, skipping remaining subjects"
        );
        for identity in &identities[index..] {
          report.record(identity.name.clone(), SubjectOutcome::Skipped);
        }
        break;
      }

      if index > 0 && !self.config.subject_delay.is_zero() {
        sleep(self.config.subject_delay).await;
      }

      let outcome = self.enrich_subject(identity, &mut report).await;
      report.record(identity.name.clone(), outcome);
    }

    tracing::info!(
      subjects = report.outcomes.len(),
      committed = report.committed(),
      rolled_back = report.rolled_back(),
      skipped = report.skipped(),
      "run finished"
    );
    report
  }

  async fn enrich_subject(
    &self,
    identity: &SubjectIdentity,
    report: &mut RunReport,
  ) -> SubjectOutcome {
    tracing::debug!(subject = %identity.name, stage = "read", "enriching");

    let existing = match self.store.find_by_name(&identity.name).await {
      Ok(existing) => existing,
      Err(e) => {
        return SubjectOutcome::RolledBack { reason: e.to_string() };
      }
    };
    let expected_updated_at = existing.as_ref().map(|r| r.updated_at);

    tracing::debug!(subject = %identity.name, stage = "query", "enriching");
    let results = self.query_sources(identity, existing.as_ref()).await;

    tracing::debug!(subject = %identity.name, stage = "reconcile", "enriching");
    let reconciled =
      self.reconciler.reconcile(existing.as_ref(), &results);
    for conflict in &reconciled.conflicts {
      tracing::warn!(
        subject = %identity.name,
        field = ?conflict.field,
        accepted_from = conflict.accepted_from.as_str(),
        rejected_from = conflict.rejected_from.as_str(),
        rejected = %conflict.rejected_value,
        "conflicting value rejected"
      );
    }
    let needs_verification = reconciled.needs_verification();

    tracing::debug!(subject = %identity.name, stage = "write", "enriching");
    let summary = match self
      .store
      .upsert(UpsertRequest {
        identity: identity.clone(),
        reconciled,
        expected_updated_at,
      })
      .await
    {
      Ok(summary) => summary,
      Err(e) => {
        tracing::warn!(subject = %identity.name, error = %e, "upsert rolled back");
        return SubjectOutcome::RolledBack { reason: e.to_string() };
      }
    };

    if self.config.enrich_donations {
      self
        .enrich_donations(identity, summary.subject_id(), report)
        .await;
    }

    SubjectOutcome::Committed { summary, needs_verification }
  }

  /// Query the stack in order, stopping early once every field has a real
  /// value from somewhere (stored or this run). A source that fails stays in
  /// the result list so the reconciler can tell "failed" from "not found".
  async fn query_sources(
    &self,
    identity: &SubjectIdentity,
    existing: Option<&neta_core::subject::StoredRecord>,
  ) -> Vec<(SourceTier, SourceResult)> {
    let mut unresolved: BTreeSet<Field> = match existing {
      Some(record) => record.unresolved_fields().into_iter().collect(),
      None => Field::ALL.into_iter().collect(),
    };

    let mut results = Vec::with_capacity(self.sources.len());
    for source in &self.sources {
      if unresolved.is_empty() {
        tracing::debug!(
          subject = %identity.name,
          "all fields resolved, skipping remaining sources"
        );
        break;
      }

      let tier = source.tier();
      let result = source.query(identity).await;
      match &result {
        SourceResult::Found(map) => {
          for (f, value) in map {
            if !field::is_sentinel(value) {
              unresolved.remove(f);
            }
          }
        }
        SourceResult::NotFound => {
          tracing::debug!(subject = %identity.name, tier = tier.as_str(), "not found");
        }
        SourceResult::Failed(failure) => {
          tracing::warn!(
            subject = %identity.name,
            tier = tier.as_str(),
            ?failure,
            "source failed"
          );
        }
      }
      results.push((tier, result));
    }
    results
  }

  async fn enrich_donations(
    &self,
    identity: &SubjectIdentity,
    subject_id: uuid::Uuid,
    report: &mut RunReport,
  ) {
    for source in &self.donation_sources {
      match source.fetch_donations(identity).await {
        DonationBatch::Found(donations) => {
          for donation in donations {
            match self.store.insert_donation(subject_id, donation).await {
              Ok(DonationOutcome::Inserted { .. }) => {
                report.donations_stored += 1;
              }
              Ok(DonationOutcome::DuplicateSkipped) => {
                report.donations_skipped += 1;
              }
              Err(e) => {
                tracing::warn!(
                  subject = %identity.name,
                  error = %e,
                  "donation insert failed"
                );
              }
            }
          }
        }
        DonationBatch::NotFound => {
          tracing::debug!(
            subject = %identity.name,
            tier = source.tier().as_str(),
            "no donations reported"
          );
        }
        DonationBatch::Failed(failure) => {
          tracing::warn!(
            subject = %identity.name,
            tier = source.tier().as_str(),
            ?failure,
            "donation source failed"
          );
        }
      }
    }
  }
}
