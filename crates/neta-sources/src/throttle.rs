//! Call pacing shared by the network-backed sources.
//!
//! Upstream sites impose fixed inter-request delays; each source owns a
//! [`Throttle`] so consecutive queries respect them, and a [`RetryPolicy`]
//! so transient failures get a bounded number of attempts instead of
//! requiring an operator to rerun the whole batch.

use std::{future::Future, time::Duration};

use neta_core::source::{SourceFailure, SourceResult};
use tokio::{
  sync::Mutex,
  time::{sleep, Instant},
};

// ─── Throttle ────────────────────────────────────────────────────────────────

/// Fixed minimum spacing between consecutive calls to one source.
pub struct Throttle {
  min_interval: Duration,
  last_call:    Mutex<Option<Instant>>,
}

impl Throttle {
  pub fn new(min_interval: Duration) -> Self {
    Self { min_interval, last_call: Mutex::new(None) }
  }

  /// Wait until at least `min_interval` has passed since the previous call,
  /// then mark now as the latest call.
  pub async fn pause(&self) {
    let mut last = self.last_call.lock().await;
    if let Some(prev) = *last {
      let elapsed = prev.elapsed();
      if elapsed < self.min_interval {
        sleep(self.min_interval - elapsed).await;
      }
    }
    *last = Some(Instant::now());
  }
}

// ─── RetryPolicy ─────────────────────────────────────────────────────────────

/// Bounded retry with linear backoff. Only `Unavailable` failures are
/// retried; a parse failure will not get better by asking again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub backoff:  Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { attempts: 3, backoff: Duration::from_secs(2) }
  }
}

impl RetryPolicy {
  /// Run `op` up to `attempts` times, sleeping `backoff * attempt` between
  /// tries. Returns the first non-retryable outcome, or the last failure.
  pub async fn run<F, Fut>(&self, mut op: F) -> SourceResult
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = SourceResult>,
  {
    let attempts = self.attempts.max(1);
    let mut last = SourceResult::Failed(SourceFailure::Unavailable(
      "no attempts made".into(),
    ));

    for attempt in 1..=attempts {
      match op().await {
        SourceResult::Failed(SourceFailure::Unavailable(reason)) => {
          tracing::warn!(attempt, attempts, %reason, "source unavailable");
          last =
            SourceResult::Failed(SourceFailure::Unavailable(reason));
          if attempt < attempts {
            sleep(self.backoff * attempt).await;
          }
        }
        other => return other,
      }
    }

    last
  }
}
