//! Context - everything one in-flight message carries through the pipeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::app::options::{self, SendOptions};
use crate::domain::{BusError, Headers, MessageId, MessageRecord, QueueIdentity, SagaData, SagaId};
use crate::ports::{Clock, IdGenerator, Transaction};
use crate::typed::Message;

/// Per-message processing context.
///
/// Owned by exactly one runner for the duration of one message; it borrows
/// that runner's transaction so handler-side writes join the same unit of
/// work.
pub struct Context<'t> {
    tx: &'t mut dyn Transaction,
    queue: QueueIdentity,
    record: MessageRecord,
    headers: Headers,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,

    saga_key: Option<String>,
    saga_data: Option<SagaData>,
    blocked: bool,
    current_handler: Option<String>,
}

impl<'t> Context<'t> {
    pub fn new(
        tx: &'t mut dyn Transaction,
        queue: QueueIdentity,
        record: MessageRecord,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let headers = record.headers.clone();
        Self {
            tx,
            queue,
            record,
            headers,
            clock,
            ids,
            saga_key: None,
            saga_data: None,
            blocked: false,
            current_handler: None,
        }
    }

    pub fn queue(&self) -> &QueueIdentity {
        &self.queue
    }

    pub fn record(&self) -> &MessageRecord {
        &self.record
    }

    pub fn message_id(&self) -> MessageId {
        self.record.message_id
    }

    pub fn message_kind(&self) -> Option<&str> {
        self.headers.message_kind.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Edits are stored with the record when it completes or is retried.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub(crate) fn into_headers(self) -> Headers {
        self.headers
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The transaction this message is processed in.
    pub fn transaction(&mut self) -> &mut dyn Transaction {
        &mut *self.tx
    }

    pub fn saga_key(&self) -> Option<&str> {
        self.saga_key.as_deref()
    }

    /// The saga row as loaded for the running saga handler. `None` while a
    /// starting handler creates it.
    pub fn saga_data(&self) -> Option<&SagaData> {
        self.saga_data.as_ref()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn current_handler(&self) -> Option<&str> {
        self.current_handler.as_deref()
    }

    /// Send `message` to a queue inside this message's transaction.
    ///
    /// The write is undone if this message's processing fails.
    pub async fn send<M: Message>(
        &mut self,
        message: &M,
        queue: &str,
        options: SendOptions,
    ) -> Result<MessageId, BusError> {
        let draft = self.draft(message, options)?;
        let message_id = draft.message_id;
        self.tx.enqueue(queue, draft).await?;
        Ok(message_id)
    }

    /// Publish `message` to `topic` inside this message's transaction.
    pub async fn publish<M: Message>(
        &mut self,
        topic: &str,
        message: &M,
        options: SendOptions,
    ) -> Result<MessageId, BusError> {
        let draft = self.draft(message, options)?;
        let message_id = draft.message_id;
        self.tx.publish(topic, draft).await?;
        Ok(message_id)
    }

    fn draft<M: Message>(
        &self,
        message: &M,
        mut options: SendOptions,
    ) -> Result<crate::domain::NewMessage, BusError> {
        // outgoing messages stay on the incoming trace
        if options.trace_id.is_none() {
            options.trace_id = self.headers.trace_id.clone();
        }
        options::draft(message, options, self.ids.as_ref(), self.clock.as_ref())
    }

    pub(crate) fn next_saga_id(&self) -> SagaId {
        self.ids.saga_id()
    }

    pub(crate) fn set_current_handler(&mut self, name: Option<String>) {
        self.current_handler = name;
    }

    pub(crate) fn bind_saga(&mut self, key: String, data: Option<SagaData>) {
        self.saga_key = Some(key);
        self.saga_data = data;
    }

    pub(crate) fn set_saga_data(&mut self, data: Option<SagaData>) {
        self.saga_data = data;
    }

    pub(crate) fn mark_blocked(&mut self, key: String) {
        self.saga_key = Some(key);
        self.blocked = true;
    }
}
