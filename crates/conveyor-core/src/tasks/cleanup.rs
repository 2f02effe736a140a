//! CleanupTask - purge completed rows past retention.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::debug;

use crate::config::{CleanupConfig, millis};
use crate::domain::StoreError;
use crate::ports::{Clock, Transaction, earlier};
use crate::scheduler::Task;

pub struct CleanupTask {
    clock: Arc<dyn Clock>,
    retention: TimeDelta,
    batch_size: usize,
}

impl CleanupTask {
    pub fn new(clock: Arc<dyn Clock>, retention: TimeDelta, batch_size: usize) -> Self {
        Self {
            clock,
            retention,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &CleanupConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, millis(config.retention_ms), config.batch_size)
    }
}

#[async_trait]
impl Task for CleanupTask {
    fn name(&self) -> &str {
        "cleanup"
    }

    /// One batch per transaction; reports work while rows were removed.
    async fn run_one(&self, tx: &mut dyn Transaction) -> Result<bool, StoreError> {
        let older_than = earlier(self.clock.now(), self.retention);
        let removed = tx.expire_messages(self.batch_size, older_than).await?;
        if removed > 0 {
            debug!(removed, %older_than, "purged completed messages");
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueIdentity;
    use crate::impls::InMemoryStore;
    use crate::ports::{DataStore, FixedClock};
    use crate::testing;

    #[tokio::test]
    async fn removes_old_completed_rows_batch_by_batch() {
        let clock = Arc::new(FixedClock::new(testing::epoch()));
        let store = InMemoryStore::new(clock.clone());
        let queue = QueueIdentity::queue("q");

        let mut tx = store.begin().await.unwrap();
        for _ in 0..5 {
            tx.enqueue("q", testing::draft("k", "{}")).await.unwrap();
        }
        tx.commit().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        while let Some(record) = tx.fetch_next_pending(&queue).await.unwrap() {
            tx.complete(&record).await.unwrap();
        }
        tx.commit().await.unwrap();

        let task = CleanupTask::new(clock.clone(), TimeDelta::hours(1), 2);

        // still within retention
        let mut tx = store.begin().await.unwrap();
        assert!(!task.run_one(&mut *tx).await.unwrap());
        drop(tx);

        clock.advance(TimeDelta::hours(2));
        let mut batches = 0;
        loop {
            let mut tx = store.begin().await.unwrap();
            let worked = task.run_one(&mut *tx).await.unwrap();
            tx.commit().await.unwrap();
            if !worked {
                break;
            }
            batches += 1;
        }
        assert_eq!(batches, 3);
        assert_eq!(store.counts(&queue).completed, 0);
    }

    #[tokio::test]
    async fn retention_beyond_the_calendar_keeps_everything() {
        let store = testing::store();
        let config = CleanupConfig {
            retention_ms: u64::MAX,
            ..CleanupConfig::default()
        };
        let task = CleanupTask::from_config(&config, store.clock());

        let mut tx = store.begin().await.unwrap();
        assert!(!task.run_one(&mut *tx).await.unwrap());
    }
}
