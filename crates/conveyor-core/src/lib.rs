//! conveyor-core
//!
//! A durable, transactional message bus: point-to-point queues, topic
//! publish/subscribe, saga state correlated by business key, retry with
//! backoff, and an adaptive scheduler that sizes worker concurrency to the
//! estimated backlog.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message record, saga row, retry 判定, errors）
//! - **ports**: 抽象化レイヤー（DataStore/Transaction, Clock, IdGenerator）
//! - **typed**: 型付き Message API（Message, Handler, Saga, SagaHandler, HandlerRegistry）
//! - **pipeline**: dispatch を包む Step の連鎖
//! - **retry**: retry strategy, failure handler, circuit breaker
//! - **scheduler**: counter, tracker, estimator, starter, runner と tick ループ
//! - **tasks**: メッセージ処理, cleanup, subscription 更新
//! - **app**: BusBuilder と Bus
//! - **impls**: 実装（InMemoryStore）
//! - **config**: serde で読める BusConfig
//! - **observability**: store の件数・統計ビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod retry;
pub mod scheduler;
pub mod tasks;
pub mod typed;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{BuildError, Bus, BusBuilder, SendOptions};
pub use config::BusConfig;
pub use domain::{BusError, MessageId, QueueIdentity, StoreError, SubscriberId};
pub use impls::InMemoryStore;
pub use typed::{Handler, Message, Saga, SagaHandler, SagaInstance};
