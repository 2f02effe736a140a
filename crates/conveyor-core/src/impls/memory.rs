//! InMemoryStore - a transactional Data Store held in process memory.
//!
//! Writes are journaled per transaction and applied on commit. Savepoints are
//! journal positions. Row claims and saga locks are tagged with the owning
//! transaction and released when it ends (commit, rollback or drop).
//!
//! Isolation is deliberately simple: reads see committed state, plus this
//! transaction's own saga writes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::domain::{
    MessageRecord, NewMessage, QueueIdentity, RecordId, SagaData, SagaLoad, StoreError,
    SubscriberId, Subscription,
};
use crate::observability::{StoreCounts, StoreStats};
use crate::ports::{Clock, DataStore, Transaction};

type SagaKey = (String, String);

struct Row {
    queue: QueueIdentity,
    record: MessageRecord,
    claimed_by: Option<u64>,
}

#[derive(Default)]
struct StoreState {
    next_record: u64,
    next_saga_row: u64,
    next_tx: u64,
    pending: BTreeMap<RecordId, Row>,
    completed: Vec<(QueueIdentity, MessageRecord)>,
    failed: Vec<(QueueIdentity, MessageRecord)>,
    sagas: HashMap<SagaKey, SagaData>,
    saga_locks: HashMap<SagaKey, u64>,
    subscriptions: BTreeMap<(String, SubscriberId), DateTime<Utc>>,
    stats: StoreStats,
}

impl StoreState {
    fn allocate_record(&mut self) -> RecordId {
        self.next_record += 1;
        RecordId(self.next_record)
    }

    fn insert_saga(&mut self, saga_kind: &str, mut data: SagaData) {
        if data.id.is_none() {
            self.next_saga_row += 1;
            data.id = Some(self.next_saga_row);
        }
        data.blocked = false;
        self.sagas
            .insert((saga_kind.to_string(), data.key.clone()), data);
    }

    fn release(&mut self, tx: u64, claimed: &BTreeSet<RecordId>) {
        for id in claimed {
            if let Some(row) = self.pending.get_mut(id)
                && row.claimed_by == Some(tx)
            {
                row.claimed_by = None;
            }
        }
        self.saga_locks.retain(|_, holder| *holder != tx);
    }

    fn eligible(&self, queue: &QueueIdentity, now: DateTime<Utc>) -> impl Iterator<Item = &Row> {
        self.pending.values().filter(move |row| {
            row.claimed_by.is_none() && &row.queue == queue && row.record.not_before <= now
        })
    }
}

/// A journaled write, applied to `StoreState` on commit.
enum Op {
    Insert {
        queue: QueueIdentity,
        record: MessageRecord,
    },
    Complete {
        record: MessageRecord,
        at: DateTime<Utc>,
    },
    Fail {
        record: MessageRecord,
        at: DateTime<Utc>,
    },
    Update(MessageRecord),
    UpsertSaga {
        saga_kind: String,
        data: SagaData,
    },
    DeleteSaga {
        saga_kind: String,
        key: String,
    },
    Subscribe {
        topic: String,
        subscriber: SubscriberId,
        valid_until: DateTime<Utc>,
    },
    Unsubscribe {
        topic: String,
        subscriber: SubscriberId,
    },
    PurgeCompleted(BTreeSet<RecordId>),
}

impl Op {
    fn apply(self, state: &mut StoreState) {
        match self {
            Op::Insert { queue, record } => {
                state.pending.insert(
                    record.id,
                    Row {
                        queue,
                        record,
                        claimed_by: None,
                    },
                );
            }
            Op::Complete { mut record, at } => {
                if let Some(row) = state.pending.remove(&record.id) {
                    record.completed = Some(at);
                    state.completed.push((row.queue, record));
                }
            }
            Op::Fail { mut record, at } => {
                if let Some(row) = state.pending.remove(&record.id) {
                    record.failed = Some(at);
                    state.failed.push((row.queue, record));
                }
            }
            Op::Update(record) => {
                if let Some(row) = state.pending.get_mut(&record.id) {
                    row.record.not_before = record.not_before;
                    row.record.retries = record.retries;
                    row.record.headers = record.headers;
                }
            }
            Op::UpsertSaga { saga_kind, data } => state.insert_saga(&saga_kind, data),
            Op::DeleteSaga { saga_kind, key } => {
                state.sagas.remove(&(saga_kind, key));
            }
            Op::Subscribe {
                topic,
                subscriber,
                valid_until,
            } => {
                state.subscriptions.insert((topic, subscriber), valid_until);
            }
            Op::Unsubscribe { topic, subscriber } => {
                state.subscriptions.remove(&(topic, subscriber));
            }
            Op::PurgeCompleted(ids) => {
                state
                    .completed
                    .retain(|(_, record)| !ids.contains(&record.id));
            }
        }
    }
}

/// In-memory `DataStore`.
///
/// Cheap to clone; clones share the same state.
///
/// # Example
/// ```ignore
/// let store = InMemoryStore::new(Arc::new(SystemClock));
/// let bus = BusBuilder::new(Arc::new(store.clone())).build()?;
/// // ... run the scheduler ...
/// assert!(store.counts(&QueueIdentity::queue("orders")).is_drained());
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            clock,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pending records of `queue`, in fetch order.
    pub fn pending(&self, queue: &QueueIdentity) -> Vec<MessageRecord> {
        let state = self.lock();
        let mut rows: Vec<MessageRecord> = state
            .pending
            .values()
            .filter(|row| &row.queue == queue)
            .map(|row| row.record.clone())
            .collect();
        rows.sort_by(fetch_order);
        rows
    }

    pub fn completed(&self, queue: &QueueIdentity) -> Vec<MessageRecord> {
        let state = self.lock();
        partition(&state.completed, queue)
    }

    pub fn failed(&self, queue: &QueueIdentity) -> Vec<MessageRecord> {
        let state = self.lock();
        partition(&state.failed, queue)
    }

    pub fn counts(&self, queue: &QueueIdentity) -> StoreCounts {
        let state = self.lock();
        StoreCounts {
            pending: state.pending.values().filter(|r| &r.queue == queue).count(),
            completed: state.completed.iter().filter(|(q, _)| q == queue).count(),
            failed: state.failed.iter().filter(|(q, _)| q == queue).count(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    /// Committed saga row, if any.
    pub fn saga_row(&self, saga_kind: &str, key: &str) -> Option<SagaData> {
        self.lock()
            .sagas
            .get(&(saga_kind.to_string(), key.to_string()))
            .cloned()
    }

    /// Insert a committed saga row directly, bypassing transactions.
    pub fn seed_saga(&self, saga_kind: &str, data: SagaData) {
        self.lock().insert_saga(saga_kind, data);
    }

    /// Live subscribers of `topic` with their expiry.
    pub fn subscribers(&self, topic: &str) -> Vec<(SubscriberId, DateTime<Utc>)> {
        self.lock()
            .subscriptions
            .iter()
            .filter(|((t, _), _)| t == topic)
            .map(|((_, subscriber), until)| (subscriber.clone(), *until))
            .collect()
    }
}

fn fetch_order(a: &MessageRecord, b: &MessageRecord) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.not_before.cmp(&b.not_before))
        .then(a.id.cmp(&b.id))
}

fn partition(rows: &[(QueueIdentity, MessageRecord)], queue: &QueueIdentity) -> Vec<MessageRecord> {
    rows.iter()
        .filter(|(q, _)| q == queue)
        .map(|(_, record)| record.clone())
        .collect()
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let id = {
            let mut state = self.lock();
            state.next_tx += 1;
            state.stats.transactions += 1;
            state.next_tx
        };
        trace!(tx = id, "begin");
        Ok(Box::new(InMemoryTransaction {
            id,
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            journal: Vec::new(),
            savepoints: Vec::new(),
            claimed: BTreeSet::new(),
            finished: false,
        }))
    }

    async fn estimate_pending_count(&self, queue: &QueueIdentity) -> Result<usize, StoreError> {
        let now = self.clock.now();
        Ok(self.lock().eligible(queue, now).count())
    }
}

pub struct InMemoryTransaction {
    id: u64,
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
    journal: Vec<Op>,
    savepoints: Vec<(String, usize)>,
    claimed: BTreeSet<RecordId>,
    finished: bool,
}

impl InMemoryTransaction {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_claimed(&self, record: &MessageRecord) -> Result<(), StoreError> {
        if self.claimed.contains(&record.id) {
            Ok(())
        } else {
            Err(StoreError::NotClaimed(record.id))
        }
    }

    /// This transaction's latest uncommitted write for a saga key:
    /// `Some(Some(row))` after an upsert, `Some(None)` after a delete.
    fn own_saga_write(&self, saga_kind: &str, key: &str) -> Option<Option<SagaData>> {
        self.journal.iter().rev().find_map(|op| match op {
            Op::UpsertSaga { saga_kind: k, data } if k == saga_kind && data.key == key => {
                Some(Some(data.clone()))
            }
            Op::DeleteSaga { saga_kind: k, key: d } if k == saga_kind && d == key => Some(None),
            _ => None,
        })
    }

    fn finish(&mut self, commit: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        let journal = std::mem::take(&mut self.journal);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if commit {
            for op in journal {
                op.apply(&mut state);
            }
            state.stats.commits += 1;
        } else {
            state.stats.rollbacks += 1;
        }
        state.release(self.id, &self.claimed);
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.finish(false);
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn fetch_next_pending(
        &mut self,
        queue: &QueueIdentity,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let now = self.clock.now();
        let tx = self.id;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let next = state
            .eligible(queue, now)
            .map(|row| &row.record)
            .min_by(|a, b| fetch_order(a, b))
            .map(|record| record.id);
        let Some(id) = next else {
            return Ok(None);
        };
        let Some(row) = state.pending.get_mut(&id) else {
            return Ok(None);
        };
        row.claimed_by = Some(tx);
        let record = row.record.clone();
        drop(state);

        self.claimed.insert(id);
        trace!(tx, record = %id, "claimed");
        Ok(Some(record))
    }

    async fn complete(&mut self, record: &MessageRecord) -> Result<(), StoreError> {
        self.ensure_claimed(record)?;
        self.lock().stats.complete_calls += 1;
        let at = self.clock.now();
        self.journal.push(Op::Complete {
            record: record.clone(),
            at,
        });
        Ok(())
    }

    async fn fail(&mut self, record: &MessageRecord) -> Result<(), StoreError> {
        self.ensure_claimed(record)?;
        self.lock().stats.fail_calls += 1;
        let at = self.clock.now();
        self.journal.push(Op::Fail {
            record: record.clone(),
            at,
        });
        Ok(())
    }

    async fn update(&mut self, record: &MessageRecord) -> Result<(), StoreError> {
        self.ensure_claimed(record)?;
        self.lock().stats.update_calls += 1;
        self.journal.push(Op::Update(record.clone()));
        Ok(())
    }

    async fn enqueue(&mut self, queue: &str, message: NewMessage) -> Result<(), StoreError> {
        let now = self.clock.now();
        let id = self.lock().allocate_record();
        self.journal.push(Op::Insert {
            queue: QueueIdentity::queue(queue),
            record: message.into_record(id, now, None),
        });
        Ok(())
    }

    async fn publish(&mut self, topic: &str, message: NewMessage) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let live: Vec<(SubscriberId, DateTime<Utc>)> = state
            .subscriptions
            .iter()
            .filter(|((t, _), until)| t == topic && **until >= now)
            .map(|((_, subscriber), until)| (subscriber.clone(), *until))
            .collect();

        let mut inserts = Vec::with_capacity(live.len());
        for (subscriber, valid_until) in live {
            let id = state.allocate_record();
            let subscription = Subscription {
                subscriber_id: subscriber.clone(),
                topic: topic.to_string(),
                valid_until,
            };
            inserts.push(Op::Insert {
                queue: QueueIdentity::subscriber(subscriber),
                record: message.clone().into_record(id, now, Some(subscription)),
            });
        }
        drop(state);

        trace!(topic, fan_out = inserts.len(), "published");
        self.journal.extend(inserts);
        Ok(())
    }

    async fn load_saga_exclusive(
        &mut self,
        saga_kind: &str,
        key: &str,
    ) -> Result<SagaLoad, StoreError> {
        let saga_key = (saga_kind.to_string(), key.to_string());
        let committed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match state.saga_locks.get(&saga_key) {
                Some(holder) if *holder != self.id => return Ok(SagaLoad::Blocked),
                _ => {}
            }
            state.saga_locks.insert(saga_key.clone(), self.id);
            state.sagas.get(&saga_key).cloned()
        };

        let current = match self.own_saga_write(saga_kind, key) {
            Some(own) => own,
            None => committed,
        };
        Ok(match current {
            Some(data) => SagaLoad::Acquired(data),
            None => SagaLoad::NotFound,
        })
    }

    async fn upsert_saga_data(
        &mut self,
        saga_kind: &str,
        data: &SagaData,
    ) -> Result<(), StoreError> {
        let saga_key = (saga_kind.to_string(), data.key.clone());
        {
            let state = self.lock();
            let held_elsewhere = matches!(state.saga_locks.get(&saga_key), Some(h) if *h != self.id);
            let duplicate_insert = data.id.is_none() && state.sagas.contains_key(&saga_key);
            if held_elsewhere || duplicate_insert {
                return Err(StoreError::UniqueViolation {
                    saga_kind: saga_kind.to_string(),
                    key: data.key.clone(),
                });
            }
        }
        self.journal.push(Op::UpsertSaga {
            saga_kind: saga_kind.to_string(),
            data: data.clone(),
        });
        Ok(())
    }

    async fn delete_saga_data(&mut self, saga_kind: &str, key: &str) -> Result<(), StoreError> {
        self.journal.push(Op::DeleteSaga {
            saga_kind: saga_kind.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.savepoints.retain(|(n, _)| n != name);
        self.savepoints.push((name.to_string(), self.journal.len()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let index = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| StoreError::UnknownSavepoint(name.to_string()))?;
        let mark = self.savepoints[index].1;
        self.journal.truncate(mark);
        // later savepoints are gone, this one stays usable
        self.savepoints.truncate(index + 1);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        subscriber: &SubscriberId,
        topic: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.journal.push(Op::Subscribe {
            topic: topic.to_string(),
            subscriber: subscriber.clone(),
            valid_until,
        });
        Ok(())
    }

    async fn expire_subscriptions(
        &mut self,
        max_rows: usize,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let stale: Vec<(String, SubscriberId)> = {
            // keys this transaction already renewed are not stale
            let renewed: BTreeSet<(&str, &SubscriberId)> = self
                .journal
                .iter()
                .filter_map(|op| match op {
                    Op::Subscribe {
                        topic,
                        subscriber,
                        valid_until,
                    } if *valid_until >= older_than => Some((topic.as_str(), subscriber)),
                    _ => None,
                })
                .collect();
            self.lock()
                .subscriptions
                .iter()
                .filter(|((topic, subscriber), until)| {
                    **until < older_than && !renewed.contains(&(topic.as_str(), subscriber))
                })
                .take(max_rows)
                .map(|(k, _)| k.clone())
                .collect()
        };
        let removed = stale.len();
        self.journal.extend(
            stale
                .into_iter()
                .map(|(topic, subscriber)| Op::Unsubscribe { topic, subscriber }),
        );
        Ok(removed)
    }

    async fn expire_messages(
        &mut self,
        max_rows: usize,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let ids: BTreeSet<RecordId> = self
            .lock()
            .completed
            .iter()
            .filter(|(_, r)| r.completed.is_some_and(|at| at < older_than))
            .take(max_rows)
            .map(|(_, r)| r.id)
            .collect();
        let removed = ids.len();
        if removed > 0 {
            self.journal.push(Op::PurgeCompleted(ids));
        }
        Ok(removed)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        trace!(tx = self.id, writes = self.journal.len(), "commit");
        self.finish(true);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        trace!(tx = self.id, "rollback");
        self.finish(false);
        Ok(())
    }
}
