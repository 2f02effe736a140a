//! Bus configuration.
//!
//! Every field has a default, so a partial JSON document is enough. Durations
//! are plain milliseconds.

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Longest duration any setting may hold: 100 years.
pub const MAX_DURATION_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// When the message job is considered due.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Schedule {
    /// Always due; demand alone decides how many runners start.
    #[default]
    Continuous,
    /// Due once every `every_ms` after the previous "no work" signal.
    Interval { every_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before a message is moved to the failed partition.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Upper bound of the random delay added to every retry.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_ms: u64,
    /// Completed rows older than this are removed.
    pub retention_ms: u64,
    pub batch_size: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            retention_ms: 24 * 60 * 60 * 1_000,
            batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub id: String,
    /// Topics to subscribe to. Empty means every kind with a plain handler.
    pub topics: Vec<String>,
    pub renew_interval_ms: u64,
    pub ttl_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            topics: Vec::new(),
            renew_interval_ms: 60_000,
            ttl_ms: 5 * 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive faults before the breaker opens.
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Upper bound of concurrently running runners, across all jobs.
    pub max_concurrency: usize,
    pub tick_interval_ms: u64,
    /// Queue this process consumes. `None` disables the queue job.
    pub queue: Option<String>,
    pub message_schedule: Schedule,
    /// How far a saga-blocked message is pushed back. At least 1.
    pub blocked_delay_ms: u64,
    pub retry: RetryConfig,
    pub cleanup: CleanupConfig,
    pub subscriber: Option<SubscriberConfig>,
    pub failure_breaker: BreakerConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            tick_interval_ms: 250,
            queue: None,
            message_schedule: Schedule::Continuous,
            blocked_delay_ms: 1_000,
            retry: RetryConfig::default(),
            cleanup: CleanupConfig::default(),
            subscriber: None,
            failure_breaker: BreakerConfig::default(),
        }
    }
}

impl BusConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0 (got {})",
                self.retry.multiplier
            )));
        }
        if let Schedule::Interval { every_ms: 0 } = self.message_schedule {
            return Err(ConfigError::Invalid("message_schedule.every_ms must be positive".into()));
        }
        if let Some(subscriber) = &self.subscriber
            && subscriber.id.trim().is_empty()
        {
            return Err(ConfigError::Invalid("subscriber.id must not be empty".into()));
        }
        if self.failure_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.blocked_delay_ms == 0 {
            return Err(ConfigError::Invalid("blocked_delay_ms must be at least 1".into()));
        }
        for (name, ms) in self.durations() {
            if ms > MAX_DURATION_MS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must not exceed {MAX_DURATION_MS} (got {ms})"
                )));
            }
        }
        Ok(())
    }

    fn durations(&self) -> Vec<(&'static str, u64)> {
        let mut durations = vec![
            ("tick_interval_ms", self.tick_interval_ms),
            ("blocked_delay_ms", self.blocked_delay_ms),
            ("retry.base_delay_ms", self.retry.base_delay_ms),
            ("retry.max_delay_ms", self.retry.max_delay_ms),
            ("retry.jitter_ms", self.retry.jitter_ms),
            ("cleanup.interval_ms", self.cleanup.interval_ms),
            ("cleanup.retention_ms", self.cleanup.retention_ms),
            ("failure_breaker.cooldown_ms", self.failure_breaker.cooldown_ms),
        ];
        if let Schedule::Interval { every_ms } = self.message_schedule {
            durations.push(("message_schedule.every_ms", every_ms));
        }
        if let Some(subscriber) = &self.subscriber {
            durations.push(("subscriber.renew_interval_ms", subscriber.renew_interval_ms));
            durations.push(("subscriber.ttl_ms", subscriber.ttl_ms));
        }
        durations
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_message_schedule(mut self, schedule: Schedule) -> Self {
        self.message_schedule = schedule;
        self
    }

    pub fn with_blocked_delay(mut self, delay: Duration) -> Self {
        self.blocked_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupConfig) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_subscriber(mut self, subscriber: SubscriberConfig) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    pub fn with_failure_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.failure_breaker = breaker;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn blocked_delay(&self) -> TimeDelta {
        millis(self.blocked_delay_ms)
    }
}

/// Milliseconds as a `TimeDelta`, saturating on overflow.
pub(crate) fn millis(ms: u64) -> TimeDelta {
    TimeDelta::try_milliseconds(i64::try_from(ms).unwrap_or(i64::MAX)).unwrap_or(TimeDelta::MAX)
}
