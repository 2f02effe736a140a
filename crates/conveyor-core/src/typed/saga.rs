//! Saga trait and the in-flight saga instance handed to saga handlers.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{BusError, SagaData, SagaId};

/// A long-running workflow whose state is persisted between messages.
///
/// # Example
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct ShippingState {
///     paid: bool,
///     packed: bool,
/// }
///
/// struct Shipping;
///
/// impl Saga for Shipping {
///     const KIND: &'static str = "shop.shipping.v1";
///     type State = ShippingState;
/// }
/// ```
pub trait Saga: Send + Sync + 'static {
    const KIND: &'static str;

    type State: Default + Serialize + DeserializeOwned + Send + Sync + 'static;
}

/// Saga state bound to one handler invocation.
///
/// Mutate `state_mut()`; call `mark_completed()` to delete the row once the
/// handler returns.
#[derive(Debug)]
pub struct SagaInstance<S> {
    row_id: Option<u64>,
    saga_id: SagaId,
    key: String,
    state: S,
    meta_data: BTreeMap<String, String>,
    is_new: bool,
    completed: bool,
}

impl<S: Default + Serialize + DeserializeOwned> SagaInstance<S> {
    pub(crate) fn start(saga_id: SagaId, key: String) -> Self {
        Self {
            row_id: None,
            saga_id,
            key,
            state: S::default(),
            meta_data: BTreeMap::new(),
            is_new: true,
            completed: false,
        }
    }

    pub(crate) fn restore<G: Saga<State = S>>(row: SagaData) -> Result<Self, BusError> {
        let state = serde_json::from_slice(&row.data).map_err(|source| BusError::Decode {
            kind: G::KIND.to_string(),
            source,
        })?;
        Ok(Self {
            row_id: row.id,
            saga_id: row.saga_id,
            key: row.key,
            state,
            meta_data: row.meta_data,
            is_new: false,
            completed: false,
        })
    }

    pub(crate) fn into_row<G: Saga<State = S>>(self) -> Result<SagaData, BusError> {
        let data = serde_json::to_vec(&self.state).map_err(|source| BusError::Encode {
            kind: G::KIND.to_string(),
            source,
        })?;
        Ok(SagaData {
            id: self.row_id,
            saga_id: self.saga_id,
            key: self.key,
            data,
            meta_data: self.meta_data,
            blocked: false,
        })
    }
}

impl<S> SagaInstance<S> {
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// True when this invocation created the saga.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn meta_data_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.meta_data
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}
