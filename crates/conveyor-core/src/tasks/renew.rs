//! RenewSubscriptionsTask - keep this subscriber's topic registrations alive.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::config::{SubscriberConfig, millis};
use crate::domain::{StoreError, SubscriberId};
use crate::ports::{Clock, Transaction, later};
use crate::scheduler::Task;

const EXPIRE_BATCH: usize = 100;

pub struct RenewSubscriptionsTask {
    subscriber: SubscriberId,
    topics: Vec<String>,
    renew_interval: TimeDelta,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    /// Last renewal known to be committed.
    renewed_at: Mutex<Option<DateTime<Utc>>>,
    /// Renewal written into the current, not yet committed, unit.
    attempted_at: Mutex<Option<DateTime<Utc>>>,
}

impl RenewSubscriptionsTask {
    pub fn new(
        subscriber: SubscriberId,
        topics: Vec<String>,
        renew_interval: TimeDelta,
        ttl: TimeDelta,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriber,
            topics,
            renew_interval,
            ttl,
            clock,
            renewed_at: Mutex::new(None),
            attempted_at: Mutex::new(None),
        }
    }

    /// `topics` is used when the config lists none.
    pub fn from_config(config: &SubscriberConfig, topics: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        let topics = if config.topics.is_empty() {
            topics
        } else {
            config.topics.clone()
        };
        Self::new(
            SubscriberId::new(config.id.clone()),
            topics,
            millis(config.renew_interval_ms),
            millis(config.ttl_ms),
            clock,
        )
    }

    pub fn subscriber(&self) -> &SubscriberId {
        &self.subscriber
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    fn renewed_recently(&self, now: DateTime<Utc>) -> bool {
        let renewed_at = self.renewed_at.lock().unwrap_or_else(PoisonError::into_inner);
        renewed_at.is_some_and(|at| now - at < self.renew_interval / 2)
    }

    /// Drop lapsed registrations, then subscribe every topic until
    /// `now + ttl`. Expiry runs first so a lapsed registration of our own is
    /// replaced, not removed.
    pub async fn renew(&self, tx: &mut dyn Transaction) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let valid_until = later(now, self.ttl);
        let expired = tx.expire_subscriptions(EXPIRE_BATCH, now).await?;
        for topic in &self.topics {
            tx.subscribe(&self.subscriber, topic, valid_until).await?;
        }
        *self.attempted_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
        info!(
            subscriber = %self.subscriber,
            topics = self.topics.len(),
            %valid_until,
            expired,
            "subscriptions renewed"
        );
        Ok(expired)
    }
}

#[async_trait]
impl Task for RenewSubscriptionsTask {
    fn name(&self) -> &str {
        "renew-subscriptions"
    }

    async fn run_one(&self, tx: &mut dyn Transaction) -> Result<bool, StoreError> {
        if self.renewed_recently(self.clock.now()) {
            debug!(subscriber = %self.subscriber, "subscriptions still fresh");
            return Ok(false);
        }
        self.renew(tx).await?;
        Ok(true)
    }

    fn committed(&self) {
        let attempted = self
            .attempted_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if attempted.is_some() {
            *self.renewed_at.lock().unwrap_or_else(PoisonError::into_inner) = attempted;
        }
    }
}
