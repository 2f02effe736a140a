//! Step trait - middleware around dispatch.

use async_trait::async_trait;

use super::context::Context;
use super::dispatch::Dispatch;
use crate::domain::BusError;
use std::sync::Arc;

/// Which pipelines a step joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepCategory {
    Queue,
    Subscription,
    Any,
}

impl StepCategory {
    pub fn applies_to(self, pipeline: StepCategory) -> bool {
        self == StepCategory::Any || self == pipeline
    }
}

/// A middleware step.
///
/// A step may inspect or mutate the context, call `next.run(ctx)` to continue,
/// skip it to short-circuit, or wrap it to observe the outcome.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn invoke(&self, ctx: &mut Context<'_>, next: Next<'_>) -> Result<(), BusError>;
}

/// The remainder of the pipeline after the current step.
pub struct Next<'a> {
    steps: &'a [Arc<dyn Step>],
    dispatch: &'a Dispatch,
}

impl<'a> Next<'a> {
    pub(crate) fn new(steps: &'a [Arc<dyn Step>], dispatch: &'a Dispatch) -> Self {
        Self { steps, dispatch }
    }

    pub async fn run(self, ctx: &mut Context<'_>) -> Result<(), BusError> {
        match self.steps.split_first() {
            Some((step, rest)) => step.invoke(ctx, Next::new(rest, self.dispatch)).await,
            None => self.dispatch.run(ctx).await,
        }
    }
}
