//! Retry strategy: decides whether a failed message runs again, and when.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::domain::{BusError, MessageRecord, RetryResult};

pub trait RetryStrategy: Send + Sync {
    /// `retries` already includes the failure being judged.
    fn determine_retry(&self, record: &MessageRecord, error: &BusError, retries: u32)
    -> RetryResult;
}

/// Exponential backoff with an attempt ceiling.
///
/// delay = base_delay * multiplier^(retries - 1), capped at `max_delay`,
/// plus a uniform random jitter in `0..=jitter`.
///
/// With base_delay=2s, multiplier=2.0:
/// - retry 1: 2s
/// - retry 2: 4s
/// - retry 3: 8s
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl ExponentialBackoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Backoff before jitter.
    pub fn next_delay(&self, retries: u32) -> Duration {
        let exponent = i32::try_from(retries.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn determine_retry(
        &self,
        _record: &MessageRecord,
        _error: &BusError,
        retries: u32,
    ) -> RetryResult {
        if retries >= self.max_retries {
            return RetryResult::give_up();
        }
        RetryResult::retry_after(self.next_delay(retries) + self.jitter())
    }
}
