//! Error taxonomy.
//!
//! - `StoreError`: Data Store / infrastructure faults. The only error that
//!   escapes `Task::run_one`.
//! - `BusError`: everything that can go wrong while a message runs through the
//!   pipeline. Converted into retry/fail bookkeeping, except `BusError::Store`
//!   faults other than `UniqueViolation`, which escape as `StoreError`.

use thiserror::Error;

/// Data Store faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0} is not claimed by this transaction")]
    NotClaimed(crate::domain::RecordId),

    #[error("unknown savepoint '{0}'")]
    UnknownSavepoint(String),

    #[error("duplicate saga row for saga={saga_kind} key={key}")]
    UniqueViolation { saga_kind: String, key: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Pipeline and dispatch errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The message carries no kind token, or the token is not registered.
    #[error("message kind not recognized: {0}")]
    ClassNotRecognized(String),

    /// The kind is known but nothing handles it (a configuration defect).
    #[error("no handlers found for message kind {0}")]
    NoHandlersFound(String),

    /// A non-starting saga handler received a message for a key with no saga row.
    #[error("saga {saga_kind} not started for key {key}")]
    SagaNotStarted { saga_kind: String, key: String },

    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BusError {
    /// Configuration/defect errors: the message can never succeed as deployed.
    ///
    /// They still go through the retry path.
    pub fn is_configuration_defect(&self) -> bool {
        matches!(
            self,
            BusError::ClassNotRecognized(_)
                | BusError::NoHandlersFound(_)
                | BusError::SagaNotStarted { .. }
        )
    }
}
