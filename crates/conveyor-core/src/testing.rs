//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::domain::{
    Headers, MessageId, MessageRecord, NewMessage, QueueIdentity, RecordId, SagaId,
};
use crate::impls::InMemoryStore;
use crate::pipeline::Context;
use crate::ports::{FixedClock, Transaction, UlidGenerator};
use crate::typed::{Handler, Message, Saga, SagaHandler, SagaInstance};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u32,
}

impl Message for Ping {
    const KIND: &'static str = "test.ping.v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u32,
}

impl Message for Pong {
    const KIND: &'static str = "test.pong.v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub seq: u32,
}

impl Message for Stop {
    const KIND: &'static str = "test.stop.v1";
}

/// Records the `seq` of every `Ping` it handles.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<u32>>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<u32> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler<Ping> for RecordingHandler {
    async fn handle(&self, _ctx: &mut Context<'_>, message: Ping) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(message.seq);
        Ok(())
    }
}

/// Always fails, counting attempts.
#[derive(Clone, Default)]
pub struct FailingHandler {
    attempts: Arc<Mutex<u32>>,
}

impl FailingHandler {
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Handler<Ping> for FailingHandler {
    async fn handle(&self, _ctx: &mut Context<'_>, message: Ping) -> anyhow::Result<()> {
        *self.attempts.lock().unwrap() += 1;
        anyhow::bail!("ping {} refused", message.seq)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Tally {
    pub count: u32,
}

pub struct TallySaga;

impl Saga for TallySaga {
    const KIND: &'static str = "test.tally.v1";
    type State = Tally;
}

fn tally_key(seq: u32) -> String {
    format!("tally-{seq}")
}

/// Starts the tally on `Pong`.
pub struct TallyStarter;

#[async_trait]
impl SagaHandler<Pong> for TallyStarter {
    type Saga = TallySaga;

    fn correlate(&self, message: &Pong) -> String {
        tally_key(message.seq)
    }

    fn starts_saga(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        _ctx: &mut Context<'_>,
        _message: Pong,
        saga: &mut SagaInstance<Tally>,
    ) -> anyhow::Result<()> {
        saga.state_mut().count = 1;
        Ok(())
    }
}

/// Bumps the tally on `Ping`.
pub struct TallyStep;

#[async_trait]
impl SagaHandler<Ping> for TallyStep {
    type Saga = TallySaga;

    fn correlate(&self, message: &Ping) -> String {
        tally_key(message.seq)
    }

    async fn handle(
        &self,
        _ctx: &mut Context<'_>,
        _message: Ping,
        saga: &mut SagaInstance<Tally>,
    ) -> anyhow::Result<()> {
        saga.state_mut().count += 1;
        Ok(())
    }
}

/// Completes the tally on `Stop`.
pub struct TallyFinisher;

#[async_trait]
impl SagaHandler<Stop> for TallyFinisher {
    type Saga = TallySaga;

    fn correlate(&self, message: &Stop) -> String {
        tally_key(message.seq)
    }

    async fn handle(
        &self,
        _ctx: &mut Context<'_>,
        _message: Stop,
        saga: &mut SagaInstance<Tally>,
    ) -> anyhow::Result<()> {
        saga.mark_completed();
        Ok(())
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn saga_id() -> SagaId {
    SagaId::from_ulid(Ulid::new())
}

/// A store on a `FixedClock` pinned at `epoch()`.
pub fn store() -> InMemoryStore {
    InMemoryStore::new(Arc::new(FixedClock::new(epoch())))
}

/// A pending record that was never written to any store.
pub fn record(id: u64, headers: Headers, body: &str) -> MessageRecord {
    MessageRecord {
        id: RecordId(id),
        message_id: MessageId::from_ulid(Ulid::new()),
        priority: 0,
        not_before: epoch(),
        enqueued: epoch(),
        completed: None,
        failed: None,
        retries: 0,
        headers,
        body: body.as_bytes().to_vec(),
        subscription: None,
    }
}

/// A draft of `kind`, eligible at `epoch()`.
pub fn draft(kind: &str, body: &str) -> NewMessage {
    NewMessage {
        message_id: MessageId::from_ulid(Ulid::new()),
        priority: 0,
        not_before: epoch(),
        headers: Headers::for_kind(kind),
        body: body.as_bytes().to_vec(),
    }
}

pub fn context<'t>(
    tx: &'t mut dyn Transaction,
    queue: QueueIdentity,
    record: MessageRecord,
    store: &InMemoryStore,
) -> Context<'t> {
    let clock = store.clock();
    let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
    Context::new(tx, queue, record, clock, ids)
}
