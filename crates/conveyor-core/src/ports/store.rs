//! DataStore port - queue, topic, saga を支える正本（source of truth）
//!
//! DataStore は以下を管理します：
//! - メッセージ行（pending / completed / failed）
//! - saga 行とその排他ロック
//! - topic の subscription
//!
//! # 設計原則
//! - 行の claim, saga ロック, savepoint はすべて `Transaction` の中にある
//! - トランザクション外で状態を変えるものはない（件数推定の読み取りのみ例外）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    MessageRecord, NewMessage, QueueIdentity, SagaData, SagaLoad, StoreError, SubscriberId,
};

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Approximate number of eligible pending rows.
    ///
    /// May be stale under concurrent consumers, but never reports zero while
    /// an unclaimed eligible row exists.
    async fn estimate_pending_count(&self, queue: &QueueIdentity) -> Result<usize, StoreError>;
}

/// One unit of work against the store.
///
/// Dropping a transaction without `commit` discards it and releases every
/// claim and lock it holds.
#[async_trait]
pub trait Transaction: Send {
    /// Claim the next eligible pending record for `queue`.
    ///
    /// Returns `None` when the queue is empty or nothing is eligible yet.
    async fn fetch_next_pending(
        &mut self,
        queue: &QueueIdentity,
    ) -> Result<Option<MessageRecord>, StoreError>;

    /// Move a claimed record to the completed partition.
    async fn complete(&mut self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Move a claimed record to the failed partition.
    async fn fail(&mut self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Persist retry bookkeeping (not_before, retries, headers) of a claimed record.
    async fn update(&mut self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Write a new pending record to a point-to-point queue.
    async fn enqueue(&mut self, queue: &str, message: NewMessage) -> Result<(), StoreError>;

    /// Write one subscribed record per live subscription of `topic`.
    async fn publish(&mut self, topic: &str, message: NewMessage) -> Result<(), StoreError>;

    async fn load_saga_exclusive(
        &mut self,
        saga_kind: &str,
        key: &str,
    ) -> Result<SagaLoad, StoreError>;

    async fn upsert_saga_data(
        &mut self,
        saga_kind: &str,
        data: &SagaData,
    ) -> Result<(), StoreError>;

    async fn delete_saga_data(&mut self, saga_kind: &str, key: &str) -> Result<(), StoreError>;

    async fn create_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    /// Undo everything written after the named savepoint. The savepoint itself
    /// stays usable.
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn subscribe(
        &mut self,
        subscriber: &SubscriberId,
        topic: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove up to `max_rows` subscriptions that lapsed before `older_than`.
    async fn expire_subscriptions(
        &mut self,
        max_rows: usize,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Remove up to `max_rows` completed records finished before `older_than`.
    async fn expire_messages(
        &mut self,
        max_rows: usize,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
