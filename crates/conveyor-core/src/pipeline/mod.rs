//! Pipeline - ordered steps wrapped around handler dispatch.
//!
//! Queue and subscription records run through separate pipelines built from
//! the same registry; each picks the steps registered for its category.

pub mod context;
pub mod dispatch;
pub mod step;
pub mod steps;

use std::sync::Arc;

pub use self::context::Context;
pub use self::dispatch::Dispatch;
pub use self::step::{Next, Step, StepCategory};
pub use self::steps::{SubscriptionValidityStep, TracingStep};

use crate::domain::BusError;
use crate::typed::HandlerRegistry;

pub struct Pipeline {
    steps: Vec<Arc<dyn Step>>,
    dispatch: Dispatch,
}

impl Pipeline {
    /// Build the pipeline for `category` (`Queue` or `Subscription`).
    pub fn new(registry: Arc<HandlerRegistry>, category: StepCategory) -> Self {
        let steps = registry.find_pipeline_steps(category);
        let dispatch = match category {
            StepCategory::Subscription => Dispatch::for_subscription(registry),
            StepCategory::Queue | StepCategory::Any => Dispatch::for_queue(registry),
        };
        Self { steps, dispatch }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn invoke(&self, ctx: &mut Context<'_>) -> Result<(), BusError> {
        Next::new(&self.steps, &self.dispatch).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Headers, QueueIdentity, Subscription, SubscriberId};
    use crate::ports::DataStore;
    use crate::testing::{self, Ping, RecordingHandler};
    use crate::typed::Message;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::sync::Mutex;

    struct Trail {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Step for Trail {
        fn name(&self) -> &str {
            self.label
        }

        async fn invoke(&self, ctx: &mut Context<'_>, next: Next<'_>) -> Result<(), BusError> {
            self.log.lock().unwrap().push(format!("{}:in", self.label));
            let result = next.run(ctx).await;
            self.log.lock().unwrap().push(format!("{}:out", self.label));
            result
        }
    }

    struct Halt;

    #[async_trait]
    impl Step for Halt {
        async fn invoke(&self, _ctx: &mut Context<'_>, _next: Next<'_>) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn trail(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Step> {
        Arc::new(Trail {
            label,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn steps_nest_by_priority_around_dispatch() {
        let store = testing::store();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = RecordingHandler::default();

        let mut registry = HandlerRegistry::new();
        registry.register::<Ping, _>(handler.clone()).unwrap();
        registry.register_step(StepCategory::Any, 20, trail("inner", &log));
        registry.register_step(StepCategory::Queue, 10, trail("outer", &log));
        registry.register_step(StepCategory::Subscription, 0, trail("subs-only", &log));
        let pipeline = Pipeline::new(Arc::new(registry), StepCategory::Queue);
        assert_eq!(pipeline.step_names(), vec!["outer", "inner"]);

        let mut tx = store.begin().await.unwrap();
        let record = testing::record(1, Headers::for_kind(Ping::KIND), r#"{"seq":4}"#);
        let mut ctx = testing::context(&mut *tx, QueueIdentity::queue("q"), record, &store);
        pipeline.invoke(&mut ctx).await.unwrap();

        assert_eq!(handler.seen(), vec![4]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:in", "inner:in", "inner:out", "outer:out"]
        );
    }

    #[tokio::test]
    async fn a_step_can_short_circuit() {
        let store = testing::store();
        let handler = RecordingHandler::default();
        let mut registry = HandlerRegistry::new();
        registry.register::<Ping, _>(handler.clone()).unwrap();
        registry.register_step(StepCategory::Queue, 0, Arc::new(Halt));
        let pipeline = Pipeline::new(Arc::new(registry), StepCategory::Queue);

        let mut tx = store.begin().await.unwrap();
        let record = testing::record(1, Headers::for_kind(Ping::KIND), r#"{"seq":4}"#);
        let mut ctx = testing::context(&mut *tx, QueueIdentity::queue("q"), record, &store);
        pipeline.invoke(&mut ctx).await.unwrap();
        assert!(handler.seen().is_empty());
    }

    #[tokio::test]
    async fn lapsed_subscription_skips_handlers() {
        let store = testing::store();
        let handler = RecordingHandler::default();
        let mut registry = HandlerRegistry::new();
        registry.register::<Ping, _>(handler.clone()).unwrap();
        registry.register_step(StepCategory::Subscription, 0, Arc::new(SubscriptionValidityStep));
        let pipeline = Pipeline::new(Arc::new(registry), StepCategory::Subscription);

        let subscriber = SubscriberId::new("svc");
        let queue = QueueIdentity::Subscriber(subscriber.clone());
        let now = testing::epoch();

        let mut live = testing::record(1, Headers::for_kind(Ping::KIND), r#"{"seq":1}"#);
        live.subscription = Some(Subscription {
            subscriber_id: subscriber.clone(),
            topic: "pings".into(),
            valid_until: now + TimeDelta::minutes(5),
        });
        let mut lapsed = testing::record(2, Headers::for_kind(Ping::KIND), r#"{"seq":2}"#);
        lapsed.subscription = Some(Subscription {
            subscriber_id: subscriber,
            topic: "pings".into(),
            valid_until: now - TimeDelta::minutes(5),
        });

        let mut tx = store.begin().await.unwrap();
        for record in [live, lapsed] {
            let mut ctx = testing::context(&mut *tx, queue.clone(), record, &store);
            pipeline.invoke(&mut ctx).await.unwrap();
        }
        assert_eq!(handler.seen(), vec![1]);
    }
}
