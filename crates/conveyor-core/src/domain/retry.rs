//! Retry decision value.

use chrono::TimeDelta;

/// Constructing a `RetryResult` with a negative delay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("retry delay must not be negative (got {delay})")]
pub struct RetryResultError {
    pub delay: TimeDelta,
}

/// Whether (and when) a failed message is tried again.
///
/// Computed fresh for every failure and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryResult {
    should_retry: bool,
    delay: TimeDelta,
}

impl RetryResult {
    pub fn new(should_retry: bool, delay: TimeDelta) -> Result<Self, RetryResultError> {
        if delay < TimeDelta::zero() {
            return Err(RetryResultError { delay });
        }
        Ok(Self {
            should_retry,
            delay,
        })
    }

    /// Retry after `delay`; a `std::time::Duration` can never be negative.
    pub fn retry_after(delay: std::time::Duration) -> Self {
        Self {
            should_retry: true,
            delay: TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn give_up() -> Self {
        Self {
            should_retry: false,
            delay: TimeDelta::zero(),
        }
    }

    pub fn should_retry(&self) -> bool {
        self.should_retry
    }

    pub fn delay(&self) -> TimeDelta {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn negative_delay_is_rejected() {
        let err = RetryResult::new(true, TimeDelta::milliseconds(-1)).unwrap_err();
        assert_eq!(err.delay, TimeDelta::milliseconds(-1));
        assert!(err.to_string().contains("must not be negative"));
    }

    #[rstest]
    #[case::retry_later(true, 1500)]
    #[case::retry_now(true, 0)]
    #[case::give_up(false, 0)]
    fn accessors_return_constructor_values(#[case] should_retry: bool, #[case] delay_ms: i64) {
        let result = RetryResult::new(should_retry, TimeDelta::milliseconds(delay_ms)).unwrap();
        assert_eq!(result.should_retry(), should_retry);
        assert_eq!(result.delay(), TimeDelta::milliseconds(delay_ms));
    }

    #[test]
    fn retry_after_converts_std_duration() {
        let result = RetryResult::retry_after(std::time::Duration::from_secs(4));
        assert!(result.should_retry());
        assert_eq!(result.delay(), TimeDelta::seconds(4));
    }
}
