//! HandlerRegistry - message kind, Handler, pipeline Step の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理（kind ごとに順序付き Vec）
//! - Generic methods での登録と型安全性
//! - 起動時に一度だけ構築し、以後は `Arc` で読み取り専用共有（ホットパスにロックなし）

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::handler::{DynHandler, Handler, SagaHandler, TypedHandler, TypedSagaHandler};
use super::message::Message;
use crate::pipeline::{Step, StepCategory};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler '{handler}' is already registered for message kind '{kind}'")]
    AlreadyRegistered { kind: String, handler: String },
}

struct RegisteredStep {
    category: StepCategory,
    priority: i32,
    step: Arc<dyn Step>,
}

/// HandlerRegistry は型付き Handler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register::<OrderPlaced, _>(SendReceipt)?;
/// registry.register_saga::<OrderPlaced, _>(OpenShipping)?;
///
/// // kind で登録順の DynHandler 一覧を取得
/// let handlers = registry.find_handlers(OrderPlaced::KIND);
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    kinds: BTreeSet<String>,
    handlers: HashMap<String, Vec<Arc<dyn DynHandler>>>,
    steps: Vec<RegisteredStep>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a kind recognizable without handling it (e.g. a message this
    /// process only sends).
    pub fn register_message<M: Message>(&mut self) {
        self.kinds.insert(M::KIND.to_string());
    }

    /// Register a handler under its type name.
    pub fn register<M: Message, H: Handler<M> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register_named::<M, H>(std::any::type_name::<H>(), handler)
    }

    pub fn register_named<M: Message, H: Handler<M> + 'static>(
        &mut self,
        name: &str,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.insert(Arc::new(TypedHandler::<M, H>::new(name, handler)))
    }

    pub fn register_saga<M: Message, H: SagaHandler<M> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = std::any::type_name::<H>();
        self.insert(Arc::new(TypedSagaHandler::<M, H>::new(name, handler)))
    }

    fn insert(&mut self, handler: Arc<dyn DynHandler>) -> Result<(), RegistryError> {
        let kind = handler.message_kind().to_string();
        let list = self.handlers.entry(kind.clone()).or_default();
        if list.iter().any(|h| h.name() == handler.name()) {
            return Err(RegistryError::AlreadyRegistered {
                kind,
                handler: handler.name().to_string(),
            });
        }
        list.push(handler);
        self.kinds.insert(kind);
        Ok(())
    }

    /// Register a pipeline step. Lower priorities run first (outermost);
    /// equal priorities keep registration order.
    pub fn register_step(&mut self, category: StepCategory, priority: i32, step: Arc<dyn Step>) {
        self.steps.push(RegisteredStep {
            category,
            priority,
            step,
        });
    }

    pub fn recognizes(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    /// Handlers for `kind` in registration order.
    pub fn find_handlers(&self, kind: &str) -> &[Arc<dyn DynHandler>] {
        self.handlers.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps applying to `category`, ordered by priority then registration.
    pub fn find_pipeline_steps(&self, category: StepCategory) -> Vec<Arc<dyn Step>> {
        let mut matching: Vec<&RegisteredStep> = self
            .steps
            .iter()
            .filter(|s| s.category.applies_to(category))
            .collect();
        // stable: ties keep registration order
        matching.sort_by_key(|s| s.priority);
        matching.into_iter().map(|s| Arc::clone(&s.step)).collect()
    }

    pub fn registered_kinds(&self) -> Vec<String> {
        self.kinds.iter().cloned().collect()
    }

    /// Kinds with at least one non-saga handler; these are the topics a
    /// subscriber listens to by default.
    pub fn subscribable_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .handlers
            .iter()
            .filter(|(_, list)| list.iter().any(|h| !h.is_saga()))
            .map(|(kind, _)| kind.clone())
            .collect();
        kinds.sort();
        kinds
    }
}
