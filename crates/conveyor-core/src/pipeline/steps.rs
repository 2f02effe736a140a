//! Built-in steps.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, debug, info_span, warn};

use super::context::Context;
use super::step::{Next, Step};
use crate::domain::BusError;

/// Wraps the rest of the pipeline in a span and logs the outcome.
pub struct TracingStep;

#[async_trait]
impl Step for TracingStep {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn invoke(&self, ctx: &mut Context<'_>, next: Next<'_>) -> Result<(), BusError> {
        let span = info_span!(
            "message",
            message_id = %ctx.message_id(),
            queue = %ctx.queue(),
            kind = ctx.message_kind().unwrap_or("<none>"),
            retries = ctx.record().retries,
        );
        let started = Instant::now();
        let result = next.run(ctx).instrument(span.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        span.in_scope(|| match &result {
            Ok(()) if ctx.is_blocked() => debug!(elapsed_ms, "blocked on saga"),
            Ok(()) => debug!(elapsed_ms, "handled"),
            Err(err) => warn!(
                elapsed_ms,
                error = %err,
                handler = ctx.current_handler(),
                "handling failed"
            ),
        });
        result
    }
}

/// Drops subscribed records whose subscription lapsed before delivery.
///
/// The message is completed without running any handler.
pub struct SubscriptionValidityStep;

#[async_trait]
impl Step for SubscriptionValidityStep {
    fn name(&self) -> &str {
        "subscription-validity"
    }

    async fn invoke(&self, ctx: &mut Context<'_>, next: Next<'_>) -> Result<(), BusError> {
        if let Some(subscription) = &ctx.record().subscription
            && subscription.valid_until < ctx.now()
        {
            debug!(
                message_id = %ctx.message_id(),
                subscriber = %subscription.subscriber_id,
                topic = %subscription.topic,
                "subscription expired before delivery; skipping handlers"
            );
            return Ok(());
        }
        next.run(ctx).await
    }
}
