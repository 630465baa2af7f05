//! Bounded retry with exponential backoff for transient broker failures.
//!
//! Only [`BrokerError::Connection`] is retried. Rejections are never
//! retried (the intent is ambiguous, e.g. insufficient funds) and auth
//! failures are fatal.

use std::time::Duration;

use log::warn;
use spotsync_broker::BrokerError;

use crate::config::RetryConfig;

/// Delay before retry `n` is `min(max, base * 2^n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub bound: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            bound: config.retry_bound,
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            bound: 0,
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Retry up to `bound` times without sleeping. For tests and simulation.
    pub fn immediate(bound: u32) -> Self {
        Self {
            bound,
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max)
    }

    /// Run `op`, retrying connection errors up to the bound.
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable one.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.bound => {
                    let delay = self.delay(attempt);
                    warn!(
                        "{what}: {e}; retry {}/{} in {delay:?}",
                        attempt + 1,
                        self.bound
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
