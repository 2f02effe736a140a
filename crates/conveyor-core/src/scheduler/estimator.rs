//! Estimators - how much work a job has outstanding.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{QueueIdentity, StoreError};
use crate::ports::DataStore;

#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate_demand(&self) -> Result<usize, StoreError>;
}

/// Fixed demand; used by interval jobs, which run one runner when due.
#[derive(Debug, Clone, Copy)]
pub struct ConstantEstimator(pub usize);

#[async_trait]
impl Estimator for ConstantEstimator {
    async fn estimate_demand(&self) -> Result<usize, StoreError> {
        Ok(self.0)
    }
}

/// Approximate number of eligible pending rows of one queue identity.
pub struct PendingCountEstimator {
    store: Arc<dyn DataStore>,
    queue: QueueIdentity,
}

impl PendingCountEstimator {
    pub fn new(store: Arc<dyn DataStore>, queue: QueueIdentity) -> Self {
        Self { store, queue }
    }
}

#[async_trait]
impl Estimator for PendingCountEstimator {
    async fn estimate_demand(&self) -> Result<usize, StoreError> {
        self.store.estimate_pending_count(&self.queue).await
    }
}
