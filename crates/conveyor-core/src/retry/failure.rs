//! Failure handlers: what happens once a message is given up on.
//!
//! A failure handler runs inside the nested "BeforeHandleFailed" savepoint of
//! the message transaction. Its writes commit with the failed row; if it
//! errors, only its own writes are rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::circuit::{CircuitBreaker, CircuitError};
use crate::app::options::{self, SendOptions};
use crate::domain::{BusError, MessageId, MessageRecord, QueueIdentity};
use crate::ports::{Clock, IdGenerator, Transaction};
use crate::typed::Message;

#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn handle_failed(
        &self,
        tx: &mut dyn Transaction,
        queue: &QueueIdentity,
        record: &MessageRecord,
        error: &BusError,
    ) -> anyhow::Result<()>;
}

/// Logs the failure and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureHandler;

#[async_trait]
impl FailureHandler for LogFailureHandler {
    async fn handle_failed(
        &self,
        _tx: &mut dyn Transaction,
        queue: &QueueIdentity,
        record: &MessageRecord,
        error: &BusError,
    ) -> anyhow::Result<()> {
        error!(
            message_id = %record.message_id,
            queue = %queue,
            kind = record.message_kind().unwrap_or("<none>"),
            retries = record.retries,
            error = %error,
            "message failed permanently"
        );
        Ok(())
    }
}

/// Notification written by `ForwardToQueue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFailed {
    pub message_id: MessageId,
    pub source: String,
    pub kind: Option<String>,
    pub retries: u32,
    pub error: String,
}

impl Message for MessageFailed {
    const KIND: &'static str = "conveyor.message.failed.v1";
}

/// Writes a `MessageFailed` notification to an error queue.
pub struct ForwardToQueue {
    queue: String,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ForwardToQueue {
    pub fn new(queue: impl Into<String>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: queue.into(),
            ids,
            clock,
        }
    }
}

#[async_trait]
impl FailureHandler for ForwardToQueue {
    async fn handle_failed(
        &self,
        tx: &mut dyn Transaction,
        queue: &QueueIdentity,
        record: &MessageRecord,
        error: &BusError,
    ) -> anyhow::Result<()> {
        let notice = MessageFailed {
            message_id: record.message_id,
            source: queue.to_string(),
            kind: record.message_kind().map(str::to_string),
            retries: record.retries,
            error: error.to_string(),
        };
        let mut send = SendOptions::default();
        send.trace_id = record.headers.trace_id.clone();
        let draft = options::draft(&notice, send, self.ids.as_ref(), self.clock.as_ref())?;
        tx.enqueue(&self.queue, draft).await?;
        Ok(())
    }
}

/// Suspends a failing failure handler behind a circuit breaker.
///
/// While the breaker is open the inner handler is skipped with a warning.
pub struct BreakerGuarded<F> {
    inner: F,
    breaker: CircuitBreaker,
}

impl<F: FailureHandler> BreakerGuarded<F> {
    pub fn new(inner: F, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<F: FailureHandler> FailureHandler for BreakerGuarded<F> {
    async fn handle_failed(
        &self,
        tx: &mut dyn Transaction,
        queue: &QueueIdentity,
        record: &MessageRecord,
        error: &BusError,
    ) -> anyhow::Result<()> {
        let result = self
            .breaker
            .call(move || self.inner.handle_failed(tx, queue, record, error))
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(CircuitError::Open { until }) => {
                warn!(
                    message_id = %record.message_id,
                    queue = %queue,
                    %until,
                    "failure handler suspended; skipping notification"
                );
                Ok(())
            }
            Err(CircuitError::Inner(err)) => Err(err),
        }
    }
}
