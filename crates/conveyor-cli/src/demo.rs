//! Demo messages, handlers and the fulfilment saga.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use conveyor_core::pipeline::Context;
use conveyor_core::{Handler, Message, Saga, SagaHandler, SagaInstance, SendOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order: u32,
    pub customer: String,
}

impl Message for OrderPlaced {
    const KIND: &'static str = "demo.order.placed.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReserved {
    pub order: u32,
}

impl Message for OrderReserved {
    const KIND: &'static str = "demo.order.reserved.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order: u32,
}

impl Message for OrderShipped {
    const KIND: &'static str = "demo.order.shipped.v1";
}

/// Reserves stock; refuses the first `failures` attempts to show retries.
pub struct ReserveStock {
    remaining_failures: AtomicU32,
}

impl ReserveStock {
    pub fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Handler<OrderPlaced> for ReserveStock {
    async fn handle(&self, ctx: &mut Context<'_>, message: OrderPlaced) -> anyhow::Result<()> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            anyhow::bail!("warehouse unavailable (failures left={left})");
        }

        info!(order = message.order, customer = %message.customer, "stock reserved");
        let reserved = OrderReserved {
            order: message.order,
        };
        ctx.publish(OrderReserved::KIND, &reserved, SendOptions::default())
            .await?;
        ctx.send(
            &OrderShipped {
                order: message.order,
            },
            "orders",
            SendOptions::default().with_priority(1),
        )
        .await?;
        Ok(())
    }
}

/// Subscriber side: tells the customer.
pub struct NotifyCustomer;

#[async_trait]
impl Handler<OrderReserved> for NotifyCustomer {
    async fn handle(&self, ctx: &mut Context<'_>, message: OrderReserved) -> anyhow::Result<()> {
        info!(order = message.order, queue = %ctx.queue(), "customer notified");
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Fulfilment {
    pub customer: String,
    pub shipped: bool,
}

pub struct FulfilmentSaga;

impl Saga for FulfilmentSaga {
    const KIND: &'static str = "demo.fulfilment.v1";
    type State = Fulfilment;
}

fn order_key(order: u32) -> String {
    format!("order-{order}")
}

pub struct OpenFulfilment;

#[async_trait]
impl SagaHandler<OrderPlaced> for OpenFulfilment {
    type Saga = FulfilmentSaga;

    fn correlate(&self, message: &OrderPlaced) -> String {
        order_key(message.order)
    }

    fn starts_saga(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        _ctx: &mut Context<'_>,
        message: OrderPlaced,
        saga: &mut SagaInstance<Fulfilment>,
    ) -> anyhow::Result<()> {
        saga.state_mut().customer = message.customer;
        Ok(())
    }
}

pub struct CloseFulfilment;

#[async_trait]
impl SagaHandler<OrderShipped> for CloseFulfilment {
    type Saga = FulfilmentSaga;

    fn correlate(&self, message: &OrderShipped) -> String {
        order_key(message.order)
    }

    async fn handle(
        &self,
        _ctx: &mut Context<'_>,
        message: OrderShipped,
        saga: &mut SagaInstance<Fulfilment>,
    ) -> anyhow::Result<()> {
        saga.state_mut().shipped = true;
        info!(order = message.order, customer = %saga.state().customer, "fulfilment closed");
        saga.mark_completed();
        Ok(())
    }
}
