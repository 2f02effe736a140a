//! BusBuilder - Bus の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装（`Result<Self, _>` を返す登録メソッド）
//! - 起動時検証（Fail-fast 設計）
//! - `Arc<dyn Trait>` による差し替え可能な依存（Clock, IdGenerator, RetryStrategy）

use std::sync::Arc;

use super::bus::Bus;
use crate::config::{BusConfig, ConfigError};
use crate::pipeline::{Step, StepCategory, SubscriptionValidityStep, TracingStep};
use crate::ports::{Clock, DataStore, IdGenerator, SystemClock, UlidGenerator};
use crate::retry::{
    BreakerGuarded, CircuitBreaker, ExponentialBackoff, FailureHandler, ForwardToQueue,
    LogFailureHandler, RetryStrategy,
};
use crate::typed::{Handler, HandlerRegistry, Message, RegistryError, SagaHandler};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing handlers for message kinds: {0:?}")]
    MissingKinds(Vec<String>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// BusBuilder は Bus を構築
///
/// # 使用例
/// ```ignore
/// let bus = BusBuilder::new(store)
///     .with_config(config)
///     .register::<OrderPlaced, _>(ReserveStock)?
///     .expect_kinds(&[OrderPlaced::KIND])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_kinds() で処理すべき message kind を宣言
/// - build() 時に設定値と「期待集合 ⊆ handler のある kind」をチェック
/// - 不足があれば BuildError を返す（実行時に retry を使い切らせない）
pub struct BusBuilder {
    store: Arc<dyn DataStore>,
    config: BusConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    retry: Option<Arc<dyn RetryStrategy>>,
    failure: Option<Arc<dyn FailureHandler>>,
    failure_queue: Option<String>,
    registry: HandlerRegistry,
    expected_kinds: Option<Vec<String>>,
}

impl BusBuilder {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            config: BusConfig::default(),
            clock: Arc::new(SystemClock),
            ids: None,
            retry: None,
            failure: None,
            failure_queue: None,
            registry: HandlerRegistry::new(),
            expected_kinds: None,
        }
    }

    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Replaces the backoff built from `BusConfig::retry`.
    pub fn with_retry_strategy(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_failure_handler(mut self, failure: Arc<dyn FailureHandler>) -> Self {
        self.failure = Some(failure);
        self.failure_queue = None;
        self
    }

    /// Write a `MessageFailed` notice to `queue` for every message that gives
    /// up, behind a breaker configured by `BusConfig::failure_breaker`.
    pub fn forward_failures_to(mut self, queue: impl Into<String>) -> Self {
        self.failure = None;
        self.failure_queue = Some(queue.into());
        self
    }

    pub fn register<M: Message, H: Handler<M> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<M, H>(handler)?;
        Ok(self)
    }

    pub fn register_named<M: Message, H: Handler<M> + 'static>(
        mut self,
        name: &str,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register_named::<M, H>(name, handler)?;
        Ok(self)
    }

    pub fn register_saga<M: Message, H: SagaHandler<M> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register_saga::<M, H>(handler)?;
        Ok(self)
    }

    /// Recognize a kind this process only sends.
    pub fn register_message<M: Message>(mut self) -> Self {
        self.registry.register_message::<M>();
        self
    }

    pub fn register_step(
        mut self,
        category: StepCategory,
        priority: i32,
        step: Arc<dyn Step>,
    ) -> Self {
        self.registry.register_step(category, priority, step);
        self
    }

    /// Kinds that must have at least one handler when `build()` runs.
    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds = Some(kinds.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn build(mut self) -> Result<Bus, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<String> = expected
                .iter()
                .filter(|kind| self.registry.find_handlers(kind).is_empty())
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingKinds(missing));
            }
        }

        // outermost, ahead of any user step
        self.registry
            .register_step(StepCategory::Any, i32::MIN, Arc::new(TracingStep));
        self.registry.register_step(
            StepCategory::Subscription,
            i32::MIN + 1,
            Arc::new(SubscriptionValidityStep),
        );

        let clock = self.clock;
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        };
        let retry: Arc<dyn RetryStrategy> = match self.retry {
            Some(retry) => retry,
            None => Arc::new(ExponentialBackoff::from_config(&self.config.retry)),
        };
        let failure: Arc<dyn FailureHandler> = match (self.failure, self.failure_queue) {
            (Some(failure), _) => failure,
            (None, Some(queue)) => Arc::new(BreakerGuarded::new(
                ForwardToQueue::new(queue, Arc::clone(&ids), Arc::clone(&clock)),
                CircuitBreaker::from_config(&self.config.failure_breaker, Arc::clone(&clock)),
            )),
            (None, None) => Arc::new(LogFailureHandler),
        };

        Ok(Bus {
            store: self.store,
            registry: Arc::new(self.registry),
            clock,
            ids,
            config: self.config,
            retry,
            failure,
        })
    }
}
