//! Retry - failure classification and isolation.
//!
//! - `RetryStrategy`: retry or give up, and how long to wait.
//! - `FailureHandler`: notified once per permanently failed message.
//! - `CircuitBreaker`: suspends a repeatedly failing optional dependency.

pub mod circuit;
pub mod failure;
pub mod strategy;

pub use self::circuit::{CircuitBreaker, CircuitError, CircuitState};
pub use self::failure::{BreakerGuarded, FailureHandler, ForwardToQueue, LogFailureHandler, MessageFailed};
pub use self::strategy::{ExponentialBackoff, RetryStrategy};
