//! Dispatch - the innermost pipeline step.
//!
//! 1. resolve the kind token from the headers
//! 2. find the handlers registered for it
//! 3. per handler: acquire the saga (if any), invoke, persist the saga
//!
//! A saga that is held elsewhere aborts the whole dispatch without error; the
//! caller sees `ctx.is_blocked()` and leaves the message pending.

use std::sync::Arc;

use tracing::debug;

use super::context::Context;
use crate::domain::{BusError, SagaLoad};
use crate::typed::{DynHandler, HandlerRegistry, SagaOutcome};

pub struct Dispatch {
    registry: Arc<HandlerRegistry>,
    sagas_enabled: bool,
}

impl Dispatch {
    /// Dispatch for queue pipelines: plain and saga handlers.
    pub fn for_queue(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            sagas_enabled: true,
        }
    }

    /// Dispatch for subscription pipelines: saga handlers are skipped.
    pub fn for_subscription(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            sagas_enabled: false,
        }
    }

    fn handlers(&self, kind: &str) -> Vec<Arc<dyn DynHandler>> {
        self.registry
            .find_handlers(kind)
            .iter()
            .filter(|h| self.sagas_enabled || !h.is_saga())
            .cloned()
            .collect()
    }

    pub async fn run(&self, ctx: &mut Context<'_>) -> Result<(), BusError> {
        let kind = match ctx.message_kind() {
            Some(kind) if self.registry.recognizes(kind) => kind.to_string(),
            Some(kind) => return Err(BusError::ClassNotRecognized(kind.to_string())),
            None => return Err(BusError::ClassNotRecognized("<missing kind header>".into())),
        };

        let handlers = self.handlers(&kind);
        if handlers.is_empty() {
            return Err(BusError::NoHandlersFound(kind));
        }

        let body = ctx.record().body.clone();
        for handler in handlers {
            ctx.set_current_handler(Some(handler.name().to_string()));

            let binding = handler.saga_binding(&body)?;
            if let Some(binding) = &binding {
                let load = ctx
                    .transaction()
                    .load_saga_exclusive(binding.saga_kind, &binding.key)
                    .await?;
                match load {
                    SagaLoad::Blocked => {
                        debug!(
                            message_id = %ctx.message_id(),
                            saga = binding.saga_kind,
                            key = %binding.key,
                            "saga is held by another transaction; leaving message pending"
                        );
                        ctx.mark_blocked(binding.key.clone());
                        return Ok(());
                    }
                    SagaLoad::NotFound if !binding.starts => {
                        return Err(BusError::SagaNotStarted {
                            saga_kind: binding.saga_kind.to_string(),
                            key: binding.key.clone(),
                        });
                    }
                    SagaLoad::NotFound => ctx.bind_saga(binding.key.clone(), None),
                    SagaLoad::Acquired(data) => ctx.bind_saga(binding.key.clone(), Some(data)),
                }
            }

            let saga = ctx.saga_data().cloned();
            let outcome = handler.invoke(ctx, &body, saga).await?;

            match (binding, outcome) {
                (Some(binding), SagaOutcome::Completed) => {
                    ctx.transaction()
                        .delete_saga_data(binding.saga_kind, &binding.key)
                        .await?;
                    ctx.set_saga_data(None);
                }
                (Some(binding), SagaOutcome::Save(data)) => {
                    ctx.transaction()
                        .upsert_saga_data(binding.saga_kind, &data)
                        .await?;
                    ctx.set_saga_data(Some(data));
                }
                _ => {}
            }
        }

        ctx.set_current_handler(None);
        Ok(())
    }
}
