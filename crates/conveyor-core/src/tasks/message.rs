//! MessageTask - process one message of one queue identity.
//!
//! ```text
//! fetch ─▶ savepoint BeforeHandler ─▶ pipeline ─┬─ ok ──────▶ complete
//!                                               ├─ blocked ─▶ rollback to savepoint, push NotBefore
//!                                               ├─ store ───▶ Err out of run_one, runner rolls back
//!                                               └─ error ───▶ rollback to savepoint, retries += 1
//!                                                               ├─ retry ─▶ NotBefore = now + delay, update
//!                                                               └─ give up ▶ fail, failure handler
//!                                                                            inside BeforeHandleFailed
//! ```
//!
//! A duplicate saga start (`UniqueViolation`) is the one store error that
//! takes the retry path: the losing message runs again and finds the row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::{debug, error, warn};

use crate::domain::{BusError, MessageRecord, QueueIdentity, StoreError};
use crate::pipeline::{Context, Pipeline};
use crate::ports::{Clock, IdGenerator, Transaction, later};
use crate::retry::{FailureHandler, RetryStrategy};
use crate::scheduler::Task;

pub const BEFORE_HANDLER: &str = "BeforeHandler";
pub const BEFORE_HANDLE_FAILED: &str = "BeforeHandleFailed";

/// Shortest push-back for a saga-blocked message, in milliseconds. A blocked
/// row that stays eligible would be fetched again by the same runner at once.
pub const MIN_BLOCKED_DELAY_MS: i64 = 1;

pub struct MessageTask {
    name: String,
    queue: QueueIdentity,
    pipeline: Arc<Pipeline>,
    retry: Arc<dyn RetryStrategy>,
    failure: Arc<dyn FailureHandler>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    blocked_delay: TimeDelta,
}

impl MessageTask {
    pub fn new(
        queue: QueueIdentity,
        pipeline: Arc<Pipeline>,
        retry: Arc<dyn RetryStrategy>,
        failure: Arc<dyn FailureHandler>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            name: format!("messages:{queue}"),
            queue,
            pipeline,
            retry,
            failure,
            clock,
            ids,
            blocked_delay: TimeDelta::seconds(1),
        }
    }

    /// Push saga-blocked messages back by `delay`, at least `MIN_BLOCKED_DELAY_MS`.
    pub fn with_blocked_delay(mut self, delay: TimeDelta) -> Self {
        self.blocked_delay = delay.max(TimeDelta::milliseconds(MIN_BLOCKED_DELAY_MS));
        self
    }

    pub fn queue(&self) -> &QueueIdentity {
        &self.queue
    }

    async fn defer_blocked(
        &self,
        tx: &mut dyn Transaction,
        mut record: MessageRecord,
    ) -> Result<(), StoreError> {
        tx.rollback_to_savepoint(BEFORE_HANDLER).await?;
        record.not_before = later(self.clock.now(), self.blocked_delay);
        tx.update(&record).await?;
        debug!(
            message_id = %record.message_id,
            queue = %self.queue,
            not_before = %record.not_before,
            "saga busy; message stays pending"
        );
        Ok(())
    }

    async fn handle_error(
        &self,
        tx: &mut dyn Transaction,
        mut record: MessageRecord,
        error: BusError,
    ) -> Result<(), StoreError> {
        tx.rollback_to_savepoint(BEFORE_HANDLER).await?;
        record.retries += 1;
        record.headers.exception = Some(error.to_string());

        let decision = self.retry.determine_retry(&record, &error, record.retries);
        if decision.should_retry() {
            record.not_before = later(self.clock.now(), decision.delay());
            tx.update(&record).await?;
            warn!(
                message_id = %record.message_id,
                queue = %self.queue,
                retries = record.retries,
                delay_ms = decision.delay().num_milliseconds(),
                defect = error.is_configuration_defect(),
                error = %error,
                "message failed; retry scheduled"
            );
            return Ok(());
        }

        tx.fail(&record).await?;
        tx.create_savepoint(BEFORE_HANDLE_FAILED).await?;
        if let Err(err) = self
            .failure
            .handle_failed(tx, &self.queue, &record, &error)
            .await
        {
            tx.rollback_to_savepoint(BEFORE_HANDLE_FAILED).await?;
            error!(
                message_id = %record.message_id,
                queue = %self.queue,
                error = %err,
                "failure handler errored; its writes were rolled back"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Task for MessageTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_one(&self, tx: &mut dyn Transaction) -> Result<bool, StoreError> {
        let Some(mut record) = tx.fetch_next_pending(&self.queue).await? else {
            return Ok(false);
        };
        tx.create_savepoint(BEFORE_HANDLER).await?;

        let (result, blocked, headers) = {
            let mut ctx = Context::new(
                &mut *tx,
                self.queue.clone(),
                record.clone(),
                Arc::clone(&self.clock),
                Arc::clone(&self.ids),
            );
            let result = self.pipeline.invoke(&mut ctx).await;
            (result, ctx.is_blocked(), ctx.into_headers())
        };

        match result {
            Ok(()) if blocked => self.defer_blocked(tx, record).await?,
            Ok(()) => {
                record.headers = headers;
                tx.complete(&record).await?;
                debug!(message_id = %record.message_id, queue = %self.queue, "message completed");
            }
            Err(BusError::Store(err)) if !matches!(err, StoreError::UniqueViolation { .. }) => {
                return Err(err);
            }
            Err(error) => {
                record.headers = headers;
                self.handle_error(tx, record, error).await?;
            }
        }
        Ok(true)
    }
}
