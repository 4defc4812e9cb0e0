use std::sync::{
  atomic::{AtomicU32, Ordering},
  Arc,
};

use neta_core::{
  donation::{DonorType, NewDonation, RecipientType},
  field::{Field, FieldMap, TO_BE_VERIFIED},
  reconcile::Reconciler,
  report::SubjectOutcome,
  source::{
    BoxFuture, DonationBatch, DonationSource, Source, SourceFailure,
    SourceResult, SourceTier,
  },
  store::{RecordStore, UpsertOutcome, UpsertRequest},
  subject::SubjectIdentity,
};
use neta_store_sqlite::SqliteStore;

use super::*;

// ─── Scripted sources ────────────────────────────────────────────────────────

struct ScriptedSource {
  tier:   SourceTier,
  result: SourceResult,
  calls:  Arc<AtomicU32>,
}

impl ScriptedSource {
  fn new(tier: SourceTier, result: SourceResult) -> Self {
    Self { tier, result, calls: Arc::new(AtomicU32::new(0)) }
  }

  fn counter(&self) -> Arc<AtomicU32> { Arc::clone(&self.calls) }
}

impl Source for ScriptedSource {
  fn tier(&self) -> SourceTier { self.tier }

  fn query<'a>(
    &'a self,
    _identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, SourceResult> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let result = self.result.clone();
    Box::pin(async move { result })
  }
}

/// Simulates a concurrent run: when queried for the target subject it
/// rewrites the stored record, so the pipeline's own write sees a moved
/// `updated_at`. Other subjects get a plain result.
struct ConcurrentWriter {
  store:  Arc<SqliteStore>,
  target: String,
}

impl Source for ConcurrentWriter {
  fn tier(&self) -> SourceTier { SourceTier::Registry }

  fn query<'a>(
    &'a self,
    identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, SourceResult> {
    Box::pin(async move {
      if identity.name != self.target {
        return found(&[(Field::Education, "B.Com")]);
      }
      let record = self
        .store
        .find_by_name(&identity.name)
        .await
        .expect("read target")
        .expect("target seeded");
      let reconciled = Reconciler::with_default_priority().reconcile(
        Some(&record),
        &[(SourceTier::Registry, found(&[(Field::Assets, "₹7 Crore")]))],
      );
      self
        .store
        .upsert(UpsertRequest {
          identity:            record.identity(),
          reconciled,
          expected_updated_at: Some(record.updated_at),
        })
        .await
        .expect("concurrent write");
      found(&[(Field::Assets, "₹9 Crore")])
    })
  }
}

struct ScriptedDonations {
  batch: DonationBatch,
}

impl DonationSource for ScriptedDonations {
  fn tier(&self) -> SourceTier { SourceTier::Knowledge }

  fn fetch_donations<'a>(
    &'a self,
    _identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, DonationBatch> {
    let batch = self.batch.clone();
    Box::pin(async move { batch })
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn found(pairs: &[(Field, &str)]) -> SourceResult {
  let map: FieldMap =
    pairs.iter().map(|(f, v)| (*f, (*v).to_owned())).collect();
  SourceResult::Found(map)
}

async fn store() -> Arc<SqliteStore> {
  Arc::new(SqliteStore::open_in_memory().await.expect("open store"))
}

fn config() -> PipelineConfig {
  PipelineConfig {
    subject_delay: Duration::ZERO,
    ..PipelineConfig::default()
  }
}

fn pipeline(store: Arc<SqliteStore>) -> Pipeline<SqliteStore> {
  Pipeline::new(store, Reconciler::with_default_priority(), config())
}

fn identity(name: &str) -> SubjectIdentity { SubjectIdentity::new(name) }

fn donation(donor: &str, year: Option<i32>) -> NewDonation {
  NewDonation {
    donor_name: donor.to_owned(),
    donor_type: DonorType::PrivateCompany,
    amount:     Some(500_000.0),
    year,
    recipient:  RecipientType::Party,
    source:     SourceTier::Knowledge,
    source_url: None,
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_subject_is_inserted_with_merged_fields_and_sentinels() {
  let store = store().await;
  let pipeline = pipeline(Arc::clone(&store))
    .with_source(Box::new(ScriptedSource::new(
      SourceTier::Registry,
      found(&[(Field::Education, "B.Com"), (Field::Assets, "₹3 Crore")]),
    )))
    .with_source(Box::new(ScriptedSource::new(
      SourceTier::Knowledge,
      found(&[(Field::DynastyStatus, "Self-Made")]),
    )));

  let report = pipeline.run(&[identity("B. Rao")]).await;

  assert_eq!(report.committed(), 1);
  let (_, outcome) = &report.outcomes[0];
  let SubjectOutcome::Committed { summary, needs_verification } = outcome
  else {
    panic!("expected committed, got {outcome:?}");
  };
  assert!(matches!(summary, UpsertOutcome::Inserted { fields: 9, .. }));
  // Some fields were sentinel-filled, so the subject is flagged.
  assert!(needs_verification);

  let record = store
    .find_by_name("B. Rao")
    .await
    .expect("lookup")
    .expect("stored");
  assert_eq!(record.fields[&Field::Education].value, "B.Com");
  assert_eq!(
    record.fields[&Field::Education].provenance,
    SourceTier::Registry
  );
  assert_eq!(record.fields[&Field::DynastyStatus].value, "Self-Made");
  assert_eq!(record.fields[&Field::Liabilities].value, TO_BE_VERIFIED);
  assert_eq!(
    record.fields[&Field::Liabilities].provenance,
    SourceTier::Fallback
  );
}

#[tokio::test]
async fn identical_rerun_is_a_no_op() {
  let store = store().await;
  let make = || {
    pipeline(Arc::clone(&store)).with_source(Box::new(
      ScriptedSource::new(
        SourceTier::Registry,
        found(&[(Field::Education, "B.Com")]),
      ),
    ))
  };

  make().run(&[identity("B. Rao")]).await;
  let before = store
    .find_by_name("B. Rao")
    .await
    .expect("lookup")
    .expect("stored");

  let report = make().run(&[identity("B. Rao")]).await;

  assert_eq!(report.no_ops(), 1);
  let after = store
    .find_by_name("B. Rao")
    .await
    .expect("lookup")
    .expect("stored");
  assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn failed_registry_does_not_downgrade_stored_value() {
  let store = store().await;

  // First run: the registry supplies assets.
  pipeline(Arc::clone(&store))
    .with_source(Box::new(ScriptedSource::new(
      SourceTier::Registry,
      found(&[(Field::Assets, "₹5 Crore")]),
    )))
    .run(&[identity("A. Reddy")])
    .await;

  // Second run: registry down, knowledge disagrees.
  let report = pipeline(Arc::clone(&store))
    .with_source(Box::new(ScriptedSource::new(
      SourceTier::Registry,
      SourceResult::Failed(SourceFailure::Unavailable("timeout".into())),
    )))
    .with_source(Box::new(ScriptedSource::new(
      SourceTier::Knowledge,
      found(&[(Field::Assets, "₹2 Crore")]),
    )))
    .run(&[identity("A. Reddy")])
    .await;

  assert_eq!(report.committed(), 1);
  let record = store
    .find_by_name("A. Reddy")
    .await
    .expect("lookup")
    .expect("stored");
  assert_eq!(record.fields[&Field::Assets].value, "₹5 Crore");
  assert_eq!(
    record.fields[&Field::Assets].provenance,
    SourceTier::Registry
  );
}

#[tokio::test]
async fn remaining_sources_are_skipped_once_all_fields_resolve() {
  let store = store().await;

  let all_fields: Vec<(Field, &str)> =
    Field::ALL.iter().map(|f| (*f, "value")).collect();
  let second =
    ScriptedSource::new(SourceTier::Knowledge, SourceResult::NotFound);
  let second_calls = second.counter();

  pipeline(Arc::clone(&store))
    .with_source(Box::new(ScriptedSource::new(
      SourceTier::Registry,
      found(&all_fields),
    )))
    .with_source(Box::new(second))
    .run(&[identity("B. Rao")])
    .await;

  assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expired_deadline_skips_subjects_without_touching_the_store() {
  let store = store().await;
  let source =
    ScriptedSource::new(SourceTier::Registry, SourceResult::NotFound);
  let calls = source.counter();

  let mut config = config();
  config.run_deadline = Some(Duration::ZERO);
  let pipeline = Pipeline::new(
    Arc::clone(&store),
    Reconciler::with_default_priority(),
    config,
  )
  .with_source(Box::new(source));

  let report =
    pipeline.run(&[identity("A. Reddy"), identity("B. Rao")]).await;

  assert_eq!(report.skipped(), 2);
  assert_eq!(report.committed(), 0);
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert!(store
    .find_by_name("A. Reddy")
    .await
    .expect("lookup")
    .is_none());
}

#[tokio::test]
async fn donations_are_stored_once_across_reruns() {
  let store = store().await;
  let make = || {
    let mut config = config();
    config.enrich_donations = true;
    Pipeline::new(
      Arc::clone(&store),
      Reconciler::with_default_priority(),
      config,
    )
    .with_source(Box::new(ScriptedSource::new(
      SourceTier::Registry,
      found(&[(Field::Education, "B.A.")]),
    )))
    .with_donation_source(Box::new(ScriptedDonations {
      batch: DonationBatch::Found(vec![
        donation("Example Infra Pvt Ltd", Some(2019)),
        donation("R. Sharma", None),
      ]),
    }))
  };

  let first = make().run(&[identity("A. Reddy")]).await;
  assert_eq!(first.donations_stored, 2);
  assert_eq!(first.donations_skipped, 0);

  let second = make().run(&[identity("A. Reddy")]).await;
  assert_eq!(second.donations_stored, 0);
  assert_eq!(second.donations_skipped, 2);

  let subject_id = store
    .find_by_name("A. Reddy")
    .await
    .expect("lookup")
    .expect("stored")
    .subject_id;
  let stored = store.donations_for(subject_id).await.expect("donations");
  assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn write_conflict_rolls_back_one_subject_without_aborting_the_batch() {
  let store = store().await;

  // Seed the target so the pipeline's read observes an updated_at.
  let reconciled = Reconciler::with_default_priority().reconcile(
    None,
    &[(SourceTier::Registry, found(&[(Field::Assets, "₹5 Crore")]))],
  );
  store
    .upsert(UpsertRequest {
      identity:            identity("A. Reddy"),
      reconciled,
      expected_updated_at: None,
    })
    .await
    .expect("seed");

  let pipeline =
    pipeline(Arc::clone(&store)).with_source(Box::new(ConcurrentWriter {
      store:  Arc::clone(&store),
      target: "A. Reddy".to_owned(),
    }));

  let report =
    pipeline.run(&[identity("A. Reddy"), identity("B. Rao")]).await;

  // The conflicting subject is isolated; the batch carries on.
  assert_eq!(report.rolled_back(), 1);
  assert_eq!(report.committed(), 1);
  assert_eq!(report.outcomes[0].0, "A. Reddy");
  assert!(matches!(
    &report.outcomes[0].1,
    SubjectOutcome::RolledBack { .. }
  ));
  assert!(matches!(
    &report.outcomes[1].1,
    SubjectOutcome::Committed { .. }
  ));

  // The concurrent run's write survives; the losing run wrote nothing.
  let record = store
    .find_by_name("A. Reddy")
    .await
    .expect("lookup")
    .expect("stored");
  assert_eq!(record.fields[&Field::Assets].value, "₹7 Crore");
}

#[tokio::test]
async fn failed_donation_source_leaves_counts_untouched() {
  let store = store().await;
  let mut config = config();
  config.enrich_donations = true;

  let report = Pipeline::new(
    Arc::clone(&store),
    Reconciler::with_default_priority(),
    config,
  )
  .with_source(Box::new(ScriptedSource::new(
    SourceTier::Registry,
    found(&[(Field::Education, "B.A.")]),
  )))
  .with_donation_source(Box::new(ScriptedDonations {
    batch: DonationBatch::Failed(SourceFailure::Unavailable("down".into())),
  }))
  .run(&[identity("A. Reddy")])
  .await;

  // The field write still commits; only the donation step failed.
  assert_eq!(report.committed(), 1);
  assert_eq!(report.donations_stored, 0);
  assert_eq!(report.donations_skipped, 0);
}
