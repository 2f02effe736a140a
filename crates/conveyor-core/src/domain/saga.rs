//! Saga rows and the exclusive-load result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::SagaId;

/// Persisted state of one saga instance.
///
/// There is at most one live row per (saga kind, key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaData {
    /// Store-assigned row id; `None` until the first upsert is committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub saga_id: SagaId,
    pub key: String,
    pub data: Vec<u8>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta_data: BTreeMap<String, String>,

    /// Set when exclusive access could not be acquired. Never persisted.
    #[serde(skip)]
    pub blocked: bool,
}

impl SagaData {
    pub fn new(saga_id: SagaId, key: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: None,
            saga_id,
            key: key.into(),
            data,
            meta_data: BTreeMap::new(),
            blocked: false,
        }
    }
}

/// Result of an exclusive saga load.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaLoad {
    /// The row exists and is now locked by the calling transaction.
    Acquired(SagaData),

    /// Another transaction holds the row (or is inserting it).
    Blocked,

    /// No row for this key; the caller holds the key until it finishes.
    NotFound,
}

impl SagaLoad {
    pub fn is_blocked(&self) -> bool {
        matches!(self, SagaLoad::Blocked)
    }
}
