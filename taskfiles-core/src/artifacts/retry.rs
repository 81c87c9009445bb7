//! Bounded retries with exponential backoff for network fetches.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::source::FetchError;

/// Retry behaviour for transient fetch failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 = a single attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
    /// Base of the exponential backoff.
    pub exponential_base: f64,
}

impl RetryPolicy {
    /// Suitable for release downloads.
    pub fn network() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            exponential_base: 2.0,
        }
    }

    /// A single attempt.
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 2.0,
        }
    }

    /// Retries without waiting. Used by tests.
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 2.0,
        }
    }

    /// Delay before `attempt` (0-indexed). Zero for the initial attempt.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.exponential_base.powi(exponent);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Runs `op` until it succeeds, fails fatally, or retries run out.
    ///
    /// On failure returns the last error with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, (FetchError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(
                        "Transient failure fetching {} (attempt {}): {}",
                        what,
                        attempt + 1,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    debug!("Giving up on {} after {} attempt(s)", what, attempt + 1);
                    return Err((e, attempt + 1));
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}
