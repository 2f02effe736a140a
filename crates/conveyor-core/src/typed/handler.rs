//! Handler trait - メッセージを処理する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (`Handler<M>`, `SagaHandler<M>`)
//! - Object-safe trait (`DynHandler`)
//! - Type erasure パターン (`TypedHandler<M, H>` / `TypedSagaHandler<M, H>` → `DynHandler`)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::message::Message;
use super::saga::{Saga, SagaInstance};
use crate::domain::{BusError, SagaData};
use crate::pipeline::Context;

/// Handles one message type.
///
/// # Example
/// ```ignore
/// struct SendReceipt;
///
/// #[async_trait]
/// impl Handler<OrderPlaced> for SendReceipt {
///     async fn handle(&self, ctx: &mut Context<'_>, message: OrderPlaced) -> anyhow::Result<()> {
///         ctx.send(&EmailReceipt::from(message), "mailer", SendOptions::default()).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    async fn handle(&self, ctx: &mut Context<'_>, message: M) -> anyhow::Result<()>;
}

/// Handles one message type against the saga instance the message correlates to.
#[async_trait]
pub trait SagaHandler<M: Message>: Send + Sync {
    type Saga: Saga;

    /// Business correlation key of the saga instance this message belongs to.
    fn correlate(&self, message: &M) -> String;

    /// Whether this handler may create the saga when no row exists yet.
    fn starts_saga(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        ctx: &mut Context<'_>,
        message: M,
        saga: &mut SagaInstance<<Self::Saga as Saga>::State>,
    ) -> anyhow::Result<()>;
}

/// Saga coordinates a handler needs before it can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaBinding {
    pub saga_kind: &'static str,
    pub key: String,
    pub starts: bool,
}

/// What dispatch must persist after a handler ran.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaOutcome {
    Stateless,
    Save(SagaData),
    Completed,
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `TypedHandler` / `TypedSagaHandler` を DynHandler に変換することで、
/// kind ごとの `Vec<Arc<dyn DynHandler>>` に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    fn name(&self) -> &str;

    fn message_kind(&self) -> &'static str;

    fn is_saga(&self) -> bool;

    /// Decode just enough of `body` to find the saga this handler needs.
    fn saga_binding(&self, body: &[u8]) -> Result<Option<SagaBinding>, BusError>;

    async fn invoke(
        &self,
        ctx: &mut Context<'_>,
        body: &[u8],
        saga: Option<SagaData>,
    ) -> Result<SagaOutcome, BusError>;
}

pub(crate) fn decode<M: Message>(body: &[u8]) -> Result<M, BusError> {
    serde_json::from_slice(body).map_err(|source| BusError::Decode {
        kind: M::KIND.to_string(),
        source,
    })
}

pub struct TypedHandler<M: Message, H: Handler<M>> {
    name: String,
    handler: H,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message, H: Handler<M>> TypedHandler<M, H> {
    pub fn new(name: impl Into<String>, handler: H) -> Self {
        Self {
            name: name.into(),
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M: Message, H: Handler<M>> DynHandler for TypedHandler<M, H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn message_kind(&self) -> &'static str {
        M::KIND
    }

    fn is_saga(&self) -> bool {
        false
    }

    fn saga_binding(&self, _body: &[u8]) -> Result<Option<SagaBinding>, BusError> {
        Ok(None)
    }

    async fn invoke(
        &self,
        ctx: &mut Context<'_>,
        body: &[u8],
        _saga: Option<SagaData>,
    ) -> Result<SagaOutcome, BusError> {
        let message = decode::<M>(body)?;
        self.handler.handle(ctx, message).await?;
        Ok(SagaOutcome::Stateless)
    }
}

pub struct TypedSagaHandler<M: Message, H: SagaHandler<M>> {
    name: String,
    handler: H,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message, H: SagaHandler<M>> TypedSagaHandler<M, H> {
    pub fn new(name: impl Into<String>, handler: H) -> Self {
        Self {
            name: name.into(),
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M: Message, H: SagaHandler<M>> DynHandler for TypedSagaHandler<M, H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn message_kind(&self) -> &'static str {
        M::KIND
    }

    fn is_saga(&self) -> bool {
        true
    }

    fn saga_binding(&self, body: &[u8]) -> Result<Option<SagaBinding>, BusError> {
        let message = decode::<M>(body)?;
        Ok(Some(SagaBinding {
            saga_kind: <H::Saga as Saga>::KIND,
            key: self.handler.correlate(&message),
            starts: self.handler.starts_saga(),
        }))
    }

    async fn invoke(
        &self,
        ctx: &mut Context<'_>,
        body: &[u8],
        saga: Option<SagaData>,
    ) -> Result<SagaOutcome, BusError> {
        let message = decode::<M>(body)?;
        let mut instance: SagaInstance<<H::Saga as Saga>::State> = match saga {
            Some(row) => SagaInstance::restore::<H::Saga>(row)?,
            None => {
                let key = self.handler.correlate(&message);
                SagaInstance::start(ctx.next_saga_id(), key)
            }
        };

        self.handler.handle(ctx, message, &mut instance).await?;

        if instance.is_completed() {
            Ok(SagaOutcome::Completed)
        } else {
            Ok(SagaOutcome::Save(instance.into_row::<H::Saga>()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Ping, RecordingHandler};

    #[test]
    fn plain_handler_has_no_saga_binding() {
        let handler = TypedHandler::<Ping, _>::new("recording", RecordingHandler::default());
        assert_eq!(handler.message_kind(), Ping::KIND);
        assert!(!handler.is_saga());
        assert_eq!(handler.saga_binding(br#"{"seq":1}"#).unwrap(), None);
    }

    #[test]
    fn decode_reports_kind_on_garbage() {
        let err = decode::<Ping>(b"not json").unwrap_err();
        assert!(matches!(err, BusError::Decode { ref kind, .. } if kind == Ping::KIND));
    }
}
