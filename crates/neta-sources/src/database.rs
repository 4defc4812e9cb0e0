//! `DatabaseSource` — the highest-trust tier: what the store already knows.
//!
//! Values reported here are the stored ones, so the reconciler will always
//! resolve them as "kept". Its real job is surfacing fuzzy name matches when
//! a subject arrives under a slightly different spelling.

use std::sync::Arc;

use neta_core::{
  field::{FieldMap, FieldValue},
  source::{BoxFuture, Source, SourceFailure, SourceResult, SourceTier},
  store::RecordStore,
  subject::SubjectIdentity,
};

pub struct DatabaseSource<S> {
  store: Arc<S>,
}

impl<S> DatabaseSource<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }
}

impl<S: RecordStore> Source for DatabaseSource<S> {
  fn tier(&self) -> SourceTier { SourceTier::Database }

  fn query<'a>(
    &'a self,
    identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, SourceResult> {
    Box::pin(async move {
      match self.store.find_by_name(&identity.name).await {
        Ok(Some(record)) => {
          let map: FieldMap = record
            .fields
            .iter()
            .filter(|(_, v)| !FieldValue::is_sentinel(v))
            .map(|(f, v)| (*f, v.value.clone()))
            .collect();
          if map.is_empty() {
            SourceResult::NotFound
          } else {
            SourceResult::Found(map)
          }
        }
        Ok(None) => SourceResult::NotFound,
        // A broken store is a transient condition, not a negative result.
        Err(e) => {
          SourceResult::Failed(SourceFailure::Unavailable(e.to_string()))
        }
      }
    })
  }
}
