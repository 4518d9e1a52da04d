use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use rocket::tokio::time::sleep;

use crate::backend::{BackendError, BackendResult};
use crate::error::{Error, Result};

/// Bounded exponential backoff around a single backend call.
///
/// Only rate-limit refusals are retried. Anything else fails on the spot, and
/// once `max_attempts` calls have been refused the call fails with
/// [`Error::RateLimited`] instead of waiting any longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);
    pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: Self::MAX_BACKOFF.max(initial_backoff),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The pause before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1 << doublings)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with something other than a rate
    /// limit, or exhausts the attempt ceiling.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{what}: succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(BackendError::RateLimited(msg)) if attempt < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    warn!(
                        "{what}: rate limited on attempt {attempt}/{}, retrying in {wait:?} ({msg})",
                        self.max_attempts
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(BackendError::RateLimited(msg)) => {
                    warn!("{what}: giving up after {attempt} rate-limited attempts ({msg})");
                    return Err(Error::RateLimited { attempts: attempt });
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_BACKOFF)
    }
}
