//! Two-tier retry.
//!
//! `RetryPolicy` wraps a single call: a handful of attempts with short delays,
//! for transient transport hiccups and empty results. A rate-limit signal is
//! never retried here; it surfaces immediately so the job-level
//! `OuterRetryPolicy` can wait as long as the platform asks.

use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            5,
            [200, 500, 1_000, 2_000, 4_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
        )
    }
}

impl RetryPolicy {
    /// `attempts` counts the first try. An empty delay table means no waiting.
    pub fn new(attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            attempts: attempts.max(1),
            delays,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before retry number `retry` (0-based). The last entry repeats.
    pub fn delay_for(&self, retry: u32) -> Duration {
        delay_from_table(&self.delays, retry)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Cancellation is checked before every attempt and while waiting.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            if err.is_rate_limit() || !err.is_transient() {
                return Err(err);
            }
            if attempt >= self.attempts {
                tracing::warn!(operation, attempts = attempt, error = %err, "inline retries exhausted");
                return Err(err);
            }

            let delay = self.delay_for(attempt - 1);
            tracing::debug!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }
}

/// Long, front-loaded-then-plateauing backoff applied to whole tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OuterRetryPolicy {
    max_attempts: u32,
    delays: Vec<Duration>,
}

impl Default for OuterRetryPolicy {
    fn default() -> Self {
        Self::new(
            12,
            [5, 15, 30, 60, 120, 300, 600, 900, 1_200, 1_800]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        )
    }
}

impl OuterRetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a task that just failed its `attempt`-th run (1-based) may run again.
    pub fn allows_retry(&self, attempt: u32, err: &Error) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }

    /// Wait before re-running after the `attempt`-th failure (1-based).
    ///
    /// A rate-limit signal raises the wait to at least what the platform asked for.
    pub fn delay_for(&self, attempt: u32, err: &Error) -> Duration {
        let table = delay_from_table(&self.delays, attempt.saturating_sub(1));
        match err.retry_after() {
            Some(wait) => table.max(wait),
            None => table,
        }
    }
}

fn delay_from_table(delays: &[Duration], idx: u32) -> Duration {
    match delays.len() {
        0 => Duration::ZERO,
        n => delays[(idx as usize).min(n - 1)],
    }
}
