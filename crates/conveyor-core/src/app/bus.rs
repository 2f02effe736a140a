//! Bus - 構築済みのアプリケーション
//!
//! # 学習ポイント
//! - `#[instrument]` による span 付きの send/publish
//! - 設定から JobDefinition を組み立てて Scheduler に渡す流れ

use std::sync::Arc;

use tracing::{debug, instrument};

use super::options::{self, SendOptions};
use crate::config::{BusConfig, millis};
use crate::domain::{BusError, MessageId, QueueIdentity, StoreError, SubscriberId};
use crate::pipeline::{Pipeline, StepCategory};
use crate::ports::{Clock, DataStore, IdGenerator};
use crate::retry::{FailureHandler, RetryStrategy};
use crate::scheduler::{
    ConstantEstimator, JobDefinition, PendingCountEstimator, Scheduler, Tracker, TrackerMode,
};
use crate::tasks::{CleanupTask, MessageTask, RenewSubscriptionsTask};
use crate::typed::{HandlerRegistry, Message};

/// Built by `BusBuilder`. Cheap to share behind an `Arc`.
pub struct Bus {
    pub(crate) store: Arc<dyn DataStore>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) config: BusConfig,
    pub(crate) retry: Arc<dyn RetryStrategy>,
    pub(crate) failure: Arc<dyn FailureHandler>,
}

impl Bus {
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn subscriber_id(&self) -> Option<SubscriberId> {
        self.config
            .subscriber
            .as_ref()
            .map(|s| SubscriberId::new(s.id.clone()))
    }

    /// Send `message` to `queue` in a transaction of its own.
    #[instrument(skip_all, fields(kind = M::KIND, queue = %queue))]
    pub async fn send<M: Message>(
        &self,
        message: &M,
        queue: &str,
        options: SendOptions,
    ) -> Result<MessageId, BusError> {
        let draft = options::draft(message, options, self.ids.as_ref(), self.clock.as_ref())?;
        let message_id = draft.message_id;
        let mut tx = self.store.begin().await?;
        tx.enqueue(queue, draft).await?;
        tx.commit().await?;
        debug!(%message_id, "sent");
        Ok(message_id)
    }

    /// Publish `message` to every live subscriber of `topic`.
    #[instrument(skip_all, fields(kind = M::KIND, topic = %topic))]
    pub async fn publish<M: Message>(
        &self,
        topic: &str,
        message: &M,
        options: SendOptions,
    ) -> Result<MessageId, BusError> {
        let draft = options::draft(message, options, self.ids.as_ref(), self.clock.as_ref())?;
        let message_id = draft.message_id;
        let mut tx = self.store.begin().await?;
        tx.publish(topic, draft).await?;
        tx.commit().await?;
        debug!(%message_id, "published");
        Ok(message_id)
    }

    /// Register this process's subscriptions right away instead of waiting
    /// for the renewal job. Returns the number of stale registrations removed.
    pub async fn renew_subscriptions(&self) -> Result<usize, StoreError> {
        let Some(task) = self.renew_task() else {
            return Ok(0);
        };
        let mut tx = self.store.begin().await?;
        let expired = task.renew(&mut *tx).await?;
        tx.commit().await?;
        Ok(expired)
    }

    /// A message task for `queue`, using the pipeline of its category.
    pub fn message_task(&self, queue: QueueIdentity) -> MessageTask {
        let category = if queue.is_subscriber() {
            StepCategory::Subscription
        } else {
            StepCategory::Queue
        };
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&self.registry), category));
        MessageTask::new(
            queue,
            pipeline,
            Arc::clone(&self.retry),
            Arc::clone(&self.failure),
            Arc::clone(&self.clock),
            Arc::clone(&self.ids),
        )
        .with_blocked_delay(self.config.blocked_delay())
    }

    fn renew_task(&self) -> Option<RenewSubscriptionsTask> {
        let subscriber = self.config.subscriber.as_ref()?;
        Some(RenewSubscriptionsTask::from_config(
            subscriber,
            self.registry.subscribable_kinds(),
            Arc::clone(&self.clock),
        ))
    }

    fn message_job(&self, queue: QueueIdentity) -> JobDefinition {
        let estimator = PendingCountEstimator::new(Arc::clone(&self.store), queue.clone());
        JobDefinition::new(
            Arc::new(self.message_task(queue)),
            Tracker::new(
                TrackerMode::from(&self.config.message_schedule),
                Arc::clone(&self.clock),
            ),
            Arc::new(estimator),
        )
    }

    /// Every job this configuration implies. Message jobs come first so they
    /// get first pick of free slots.
    pub fn jobs(&self) -> Vec<JobDefinition> {
        let mut jobs = Vec::new();
        if let Some(queue) = &self.config.queue {
            jobs.push(self.message_job(QueueIdentity::queue(queue.clone())));
        }
        if let Some(subscriber) = self.subscriber_id() {
            jobs.push(self.message_job(QueueIdentity::subscriber(subscriber)));
        }
        if let (Some(task), Some(subscriber)) = (self.renew_task(), &self.config.subscriber) {
            jobs.push(
                JobDefinition::new(
                    Arc::new(task),
                    Tracker::interval(millis(subscriber.renew_interval_ms), Arc::clone(&self.clock)),
                    Arc::new(ConstantEstimator(1)),
                )
                .with_max_runners(1),
            );
        }
        let cleanup = &self.config.cleanup;
        jobs.push(
            JobDefinition::new(
                Arc::new(CleanupTask::from_config(cleanup, Arc::clone(&self.clock))),
                Tracker::interval(millis(cleanup.interval_ms), Arc::clone(&self.clock)),
                Arc::new(ConstantEstimator(1)),
            )
            .with_max_runners(1),
        );
        jobs
    }

    /// A scheduler loaded with `jobs()`, not yet started.
    pub fn scheduler(&self) -> Scheduler {
        let mut scheduler = Scheduler::new(
            Arc::clone(&self.store),
            self.config.max_concurrency,
            self.config.tick_interval(),
        );
        for job in self.jobs() {
            scheduler.add_job(job);
        }
        scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::BusBuilder;
    use crate::config::SubscriberConfig;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use crate::testing::{self, Ping, RecordingHandler};
    use chrono::TimeDelta;

    fn build(store: &InMemoryStore, config: BusConfig) -> (Bus, RecordingHandler) {
        let handler = RecordingHandler::default();
        let bus = BusBuilder::new(Arc::new(store.clone()))
            .with_config(config)
            .with_clock(store.clock())
            .register::<Ping, _>(handler.clone())
            .unwrap()
            .build()
            .unwrap();
        (bus, handler)
    }

    #[tokio::test]
    async fn send_commits_a_pending_row() {
        let store = testing::store();
        let (bus, _) = build(&store, BusConfig::default());

        let options = SendOptions::default().with_delay(TimeDelta::seconds(5));
        let id = bus.send(&Ping { seq: 3 }, "work", options).await.unwrap();

        let pending = store.pending(&QueueIdentity::queue("work"));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, id);
        assert_eq!(pending[0].headers.message_kind.as_deref(), Some(Ping::KIND));
        assert_eq!(pending[0].not_before, testing::epoch() + TimeDelta::seconds(5));
        assert_eq!(store.stats().commits, 1);
    }

    #[test]
    fn jobs_follow_configuration() {
        let store = testing::store();
        let (bus, _) = build(&store, BusConfig::default());
        let names: Vec<String> = bus.jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(names, vec!["cleanup"]);

        let config = BusConfig::default()
            .with_queue("work")
            .with_subscriber(SubscriberConfig {
                id: "svc".into(),
                ..SubscriberConfig::default()
            });
        let (bus, _) = build(&store, config);
        let names: Vec<String> = bus.jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(
            names,
            vec![
                "messages:queue:work",
                "messages:subscriber:svc",
                "renew-subscriptions",
                "cleanup"
            ]
        );
    }

    #[tokio::test]
    async fn scheduler_drains_the_configured_queue() {
        let clock = Arc::new(FixedClock::new(testing::epoch()));
        let store = InMemoryStore::new(clock);
        let (bus, handler) = build(&store, BusConfig::default().with_queue("work"));
        for seq in 0..3 {
            bus.send(&Ping { seq }, "work", SendOptions::default())
                .await
                .unwrap();
        }

        bus.scheduler().run_until_idle().await;

        let mut seen = handler.seen();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(store.counts(&QueueIdentity::queue("work")).is_drained());
    }

    #[tokio::test]
    async fn renewal_lets_published_messages_reach_this_subscriber() {
        let store = testing::store();
        let config = BusConfig::default().with_subscriber(SubscriberConfig {
            id: "svc".into(),
            ..SubscriberConfig::default()
        });
        let (bus, handler) = build(&store, config);

        bus.publish(Ping::KIND, &Ping { seq: 1 }, SendOptions::default())
            .await
            .unwrap();
        let inbox = QueueIdentity::subscriber(SubscriberId::new("svc"));
        // nobody subscribed yet
        assert_eq!(store.counts(&inbox).total(), 0);

        bus.renew_subscriptions().await.unwrap();
        bus.publish(Ping::KIND, &Ping { seq: 2 }, SendOptions::default())
            .await
            .unwrap();
        bus.scheduler().run_until_idle().await;

        assert_eq!(handler.seen(), vec![2]);
        assert_eq!(store.counts(&inbox).completed, 1);
    }
}
