//! Typed - 型付き Message API
//!
//! このモジュールは message kind の typo を型で排除し、
//! Handler / Saga との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Message`, `Handler<M>`, `Saga`, `SagaHandler<M>` - 型安全
//! - **内部（Dyn）**: `DynHandler` - object-safe, type erasure。
//!   `HandlerRegistry` に kind ごとに格納され、dispatch が raw body で呼ぶ

pub mod handler;
pub mod message;
pub mod registry;
pub mod saga;

pub use self::handler::{DynHandler, Handler, SagaBinding, SagaHandler, SagaOutcome};
pub use self::message::Message;
pub use self::registry::{HandlerRegistry, RegistryError};
pub use self::saga::{Saga, SagaInstance};
