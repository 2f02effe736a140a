//! Circuit breaker for optional dependencies.
//!
//! Cleared -> Armed (faults counted) -> Faulted (calls suspended until the
//! cool-down ends) -> Trial. In Trial exactly one call is in flight and the
//! rest stay suspended: a success clears the breaker, a fault trips it again.
//! A trial that never reports back expires after one more cool-down.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::{BreakerConfig, millis};
use crate::ports::{Clock, later};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Cleared,
    Armed { faults: u32 },
    Faulted { until: DateTime<Utc> },
    /// One call admitted; others are suspended until it reports or `until`.
    Trial { until: DateTime<Utc> },
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit open until {until}")]
    Open { until: DateTime<Utc> },

    #[error("{0}")]
    Inner(E),
}

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: TimeDelta,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            clock,
            state: Mutex::new(CircuitState::Cleared),
        }
    }

    pub fn from_config(config: &BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.failure_threshold, millis(config.cooldown_ms), clock)
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ok when a call may proceed; the open-until instant otherwise.
    pub fn check(&self) -> Result<(), DateTime<Utc>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        match *state {
            CircuitState::Faulted { until } | CircuitState::Trial { until } if now < until => {
                Err(until)
            }
            CircuitState::Faulted { .. } | CircuitState::Trial { .. } => {
                *state = CircuitState::Trial {
                    until: later(now, self.cooldown),
                };
                Ok(())
            }
            CircuitState::Cleared | CircuitState::Armed { .. } => Ok(()),
        }
    }

    pub fn record_success(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = CircuitState::Cleared;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let faults = match *state {
            CircuitState::Cleared => 1,
            CircuitState::Armed { faults } => faults.saturating_add(1),
            CircuitState::Trial { .. } => self.threshold,
            CircuitState::Faulted { .. } => return,
        };
        *state = if faults >= self.threshold {
            CircuitState::Faulted {
                until: later(self.clock.now(), self.cooldown),
            }
        } else {
            CircuitState::Armed { faults }
        };
    }

    /// Run `f` unless the breaker is open, and record its outcome.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.check()
            .map_err(|until| CircuitError::Open { until })?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitError::Inner(err))
            }
        }
    }
}
