//! End-to-end scenarios against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use conveyor_core::config::{RetryConfig, SubscriberConfig};
use conveyor_core::domain::{MessageRecord, SagaLoad};
use conveyor_core::pipeline::Context;
use conveyor_core::ports::{DataStore, FixedClock, Transaction};
use conveyor_core::retry::{FailureHandler, MessageFailed};
use conveyor_core::scheduler::{
    ConstantEstimator, JobDefinition, Scheduler, Task, TaskCounter, Tracker,
};
use conveyor_core::{
    Bus, BusBuilder, BusConfig, BusError, Handler, InMemoryStore, Message, QueueIdentity, Saga,
    SagaHandler, SagaInstance, SendOptions, StoreError, SubscriberId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Invoice {
    number: u32,
}

impl Message for Invoice {
    const KIND: &'static str = "billing.invoice.v1";
}

#[derive(Default)]
struct Counting(AtomicU32);

impl Counting {
    fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

struct Accept(Arc<Counting>);

#[async_trait]
impl Handler<Invoice> for Accept {
    async fn handle(&self, _ctx: &mut Context<'_>, _message: Invoice) -> anyhow::Result<()> {
        self.0.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Reject;

#[async_trait]
impl Handler<Invoice> for Reject {
    async fn handle(&self, _ctx: &mut Context<'_>, message: Invoice) -> anyhow::Result<()> {
        anyhow::bail!("invoice {} is malformed", message.number)
    }
}

struct CountFailures(Arc<Counting>);

#[async_trait]
impl FailureHandler for CountFailures {
    async fn handle_failed(
        &self,
        _tx: &mut dyn Transaction,
        _queue: &QueueIdentity,
        _record: &MessageRecord,
        _error: &BusError,
    ) -> anyhow::Result<()> {
        self.0.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Dunning {
    reminders: u32,
}

struct DunningSaga;

impl Saga for DunningSaga {
    const KIND: &'static str = "billing.dunning.v1";
    type State = Dunning;
}

struct StartDunning;

#[async_trait]
impl SagaHandler<Invoice> for StartDunning {
    type Saga = DunningSaga;

    fn correlate(&self, message: &Invoice) -> String {
        format!("invoice-{}", message.number)
    }

    fn starts_saga(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        _ctx: &mut Context<'_>,
        _message: Invoice,
        saga: &mut SagaInstance<Dunning>,
    ) -> anyhow::Result<()> {
        saga.state_mut().reminders += 1;
        Ok(())
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

fn setup() -> (Arc<FixedClock>, InMemoryStore) {
    let clock = Arc::new(FixedClock::new(epoch()));
    let store = InMemoryStore::new(clock.clone());
    (clock, store)
}

fn builder(store: &InMemoryStore, config: BusConfig) -> BusBuilder {
    BusBuilder::new(Arc::new(store.clone()))
        .with_config(config)
        .with_clock(store.clock())
}

async fn send_invoices(bus: &Bus, queue: &str, count: u32) {
    for number in 0..count {
        let options = SendOptions::default().not_before(epoch() - TimeDelta::minutes(1));
        bus.send(&Invoice { number }, queue, options).await.unwrap();
    }
}

#[tokio::test]
async fn ten_messages_drain_through_one_runner() {
    let (_, store) = setup();
    let handled = Arc::new(Counting::default());
    let config = BusConfig::default()
        .with_queue("invoices")
        .with_max_concurrency(1);
    let bus = builder(&store, config)
        .register::<Invoice, _>(Accept(handled.clone()))
        .unwrap()
        .build()
        .unwrap();
    send_invoices(&bus, "invoices", 10).await;
    let before = store.stats();

    bus.scheduler().run_until_idle().await;

    let after = store.stats();
    let queue = QueueIdentity::queue("invoices");
    assert_eq!(handled.count(), 10);
    assert_eq!(after.complete_calls, 10);
    assert_eq!(store.counts(&queue).pending, 0);
    assert_eq!(store.counts(&queue).completed, 10);
    // one committed transaction per message
    assert_eq!(after.commits - before.commits, 10);
}

#[tokio::test]
async fn always_failing_message_is_retried_then_failed_once() {
    let (clock, store) = setup();
    let failures = Arc::new(Counting::default());
    let config = BusConfig::default().with_retry(RetryConfig {
        max_retries: 5,
        base_delay_ms: 1_000,
        multiplier: 2.0,
        max_delay_ms: 60_000,
        jitter_ms: 0,
    });
    let bus = builder(&store, config)
        .register::<Invoice, _>(Reject)
        .unwrap()
        .with_failure_handler(Arc::new(CountFailures(failures.clone())))
        .build()
        .unwrap();
    send_invoices(&bus, "invoices", 1).await;

    let queue = QueueIdentity::queue("invoices");
    let task = bus.message_task(queue.clone());
    let mut not_before = Vec::new();
    for attempt in 1..=5 {
        let mut tx = store.begin().await.unwrap();
        assert!(task.run_one(&mut *tx).await.unwrap());
        tx.commit().await.unwrap();

        if attempt < 5 {
            let pending = store.pending(&queue);
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].retries, attempt);
            not_before.push(pending[0].not_before);
        }
        clock.advance(TimeDelta::minutes(10));
    }

    assert!(not_before.windows(2).all(|w| w[0] < w[1]));
    let stats = store.stats();
    assert_eq!(stats.update_calls, 4);
    assert_eq!(stats.fail_calls, 1);
    assert_eq!(failures.count(), 1);

    let failed = store.failed(&queue);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].completed.is_none());
    assert!(failed[0].failed.is_some());
    assert_eq!(store.counts(&queue).pending, 0);
}

#[tokio::test]
async fn given_up_messages_are_forwarded_to_the_error_queue() {
    let (_, store) = setup();
    let config = BusConfig::default().with_retry(RetryConfig {
        max_retries: 1,
        ..RetryConfig::default()
    });
    let bus = builder(&store, config)
        .register::<Invoice, _>(Reject)
        .unwrap()
        .forward_failures_to("errors")
        .build()
        .unwrap();
    send_invoices(&bus, "invoices", 1).await;

    let task = bus.message_task(QueueIdentity::queue("invoices"));
    let mut tx = store.begin().await.unwrap();
    task.run_one(&mut *tx).await.unwrap();
    tx.commit().await.unwrap();

    let notices = store.pending(&QueueIdentity::queue("errors"));
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].headers.message_kind.as_deref(),
        Some(MessageFailed::KIND)
    );
    let notice: MessageFailed = serde_json::from_slice(&notices[0].body).unwrap();
    assert_eq!(notice.source, "queue:invoices");
    assert_eq!(notice.retries, 1);
    assert!(notice.error.contains("invoice 0 is malformed"));
}

#[tokio::test]
async fn concurrent_saga_starts_persist_one_row() {
    let (clock, store) = setup();
    let bus = builder(&store, BusConfig::default())
        .register_saga::<Invoice, _>(StartDunning)
        .unwrap()
        .build()
        .unwrap();
    // same invoice number, same saga key
    for _ in 0..2 {
        let options = SendOptions::default().not_before(epoch() - TimeDelta::minutes(1));
        bus.send(&Invoice { number: 7 }, "invoices", options)
            .await
            .unwrap();
    }

    let queue = QueueIdentity::queue("invoices");
    let task = bus.message_task(queue.clone());
    let mut first = store.begin().await.unwrap();
    let mut second = store.begin().await.unwrap();
    assert!(task.run_one(&mut *first).await.unwrap());
    assert!(task.run_one(&mut *second).await.unwrap());
    first.commit().await.unwrap();
    second.commit().await.unwrap();

    let row = store.saga_row(DunningSaga::KIND, "invoice-7").unwrap();
    let state: Dunning = serde_json::from_slice(&row.data).unwrap();
    assert_eq!(state.reminders, 1);

    // the blocked message stays pending without spending a retry
    let pending = store.pending(&queue);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retries, 0);
    assert!(pending[0].not_before > epoch());

    clock.advance(TimeDelta::seconds(5));
    let mut tx = store.begin().await.unwrap();
    assert!(task.run_one(&mut *tx).await.unwrap());
    tx.commit().await.unwrap();

    let row = store.saga_row(DunningSaga::KIND, "invoice-7").unwrap();
    let state: Dunning = serde_json::from_slice(&row.data).unwrap();
    assert_eq!(state.reminders, 2);
    assert_eq!(store.counts(&queue).completed, 2);
}

#[tokio::test]
async fn exclusive_saga_load_blocks_a_second_transaction() {
    let (_, store) = setup();
    let mut first = store.begin().await.unwrap();
    let mut second = store.begin().await.unwrap();

    assert_eq!(
        first.load_saga_exclusive("k", "key").await.unwrap(),
        SagaLoad::NotFound
    );
    assert!(
        second
            .load_saga_exclusive("k", "key")
            .await
            .unwrap()
            .is_blocked()
    );
    first.rollback().await.unwrap();

    // released with the first transaction
    assert_eq!(
        second.load_saga_exclusive("k", "key").await.unwrap(),
        SagaLoad::NotFound
    );
}

struct Idle;

#[async_trait]
impl Task for Idle {
    fn name(&self) -> &str {
        "idle"
    }

    async fn run_one(&self, _tx: &mut dyn Transaction) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[tokio::test]
async fn starter_never_exceeds_demand_or_budget() {
    let (clock, store) = setup();
    let scheduler = Scheduler::new(Arc::new(store), 3, std::time::Duration::from_millis(10))
        .with_job(JobDefinition::new(
            Arc::new(Idle),
            Tracker::continuous(clock.clone()),
            Arc::new(ConstantEstimator(10)),
        ));

    let launched = scheduler.tick_once().await;
    assert!(launched <= 3);
    assert!(scheduler.counter().running() <= scheduler.counter().max());
    scheduler.wait_idle().await;
    assert_eq!(scheduler.counter().available(), 3);

    let counter = TaskCounter::new(1);
    let slot = counter.try_reserve();
    assert!(slot.is_some());
    assert!(counter.try_reserve().is_none());
    assert_eq!(counter.available(), 0);
    drop(slot);
    assert_eq!(counter.available(), 1);
}

#[tokio::test]
async fn publish_fans_out_to_every_live_subscriber() {
    let (_, store) = setup();
    let mut handled = Vec::new();
    let mut buses = Vec::new();
    for id in ["ledger", "mailer"] {
        let counting = Arc::new(Counting::default());
        let config = BusConfig::default().with_subscriber(SubscriberConfig {
            id: id.to_string(),
            ..SubscriberConfig::default()
        });
        let bus = builder(&store, config)
            .register::<Invoice, _>(Accept(counting.clone()))
            .unwrap()
            .build()
            .unwrap();
        bus.renew_subscriptions().await.unwrap();
        handled.push(counting);
        buses.push(bus);
    }

    buses[0]
        .publish(Invoice::KIND, &Invoice { number: 1 }, SendOptions::default())
        .await
        .unwrap();

    for id in ["ledger", "mailer"] {
        let inbox = QueueIdentity::subscriber(SubscriberId::new(id));
        let pending = store.pending(&inbox);
        assert_eq!(pending.len(), 1);
        let subscription = pending[0].subscription.as_ref().unwrap();
        assert_eq!(subscription.topic, Invoice::KIND);
        assert_eq!(subscription.subscriber_id, SubscriberId::new(id));
    }

    buses[0].scheduler().run_until_idle().await;
    assert_eq!(handled[0].count(), 1);
    assert_eq!(handled[1].count(), 0);
    let mailer = QueueIdentity::subscriber(SubscriberId::new("mailer"));
    assert_eq!(store.counts(&mailer).pending, 1);
}
