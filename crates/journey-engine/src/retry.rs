//! Caller-side retry for optimistic-concurrency losses.
//!
//! The engine never retries its own writes. Callers that want to absorb a
//! lost race wrap the whole operation (re-read included) in [`with_retry`].

use std::{future::Future, time::Duration};

use journey_core::{ErrorKind, Result};
use rand_core::{OsRng, RngCore as _};
use tracing::debug;

use crate::config::RetryPolicy;

/// Run `op` until it succeeds, fails with anything other than
/// `ConcurrentTransition`, or `policy.max_attempts` is reached.
///
/// Each retry waits `base_delay_ms * 2^(attempt - 1)` plus up to
/// `base_delay_ms` of random jitter.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 1;
  loop {
    match op().await {
      Err(e) if e.kind() == ErrorKind::ConcurrentTransition && attempt < max_attempts => {
        let delay = backoff(policy, attempt);
        debug!(attempt, ?delay, error = %e, "retrying after concurrent transition");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      other => return other,
    }
  }
}

fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
  let base = policy.base_delay_ms;
  let exp = base.saturating_mul(1 << (attempt - 1).min(16));
  let jitter = if base == 0 { 0 } else { OsRng.next_u64() % (base + 1) };
  Duration::from_millis(exp.saturating_add(jitter))
}
