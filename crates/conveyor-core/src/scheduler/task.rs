//! Task - one unit of work per job kind.

use async_trait::async_trait;

use crate::domain::StoreError;
use crate::ports::Transaction;

/// A unit of work run inside a runner-owned transaction.
///
/// `Ok(true)`: work was done, commit and go again.
/// `Ok(false)`: nothing to do, the transaction is rolled back.
/// `Err(_)`: infrastructure fault, the transaction is rolled back and the
/// runner stops.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn run_one(&self, tx: &mut dyn Transaction) -> Result<bool, StoreError>;

    /// Called after the runner committed a unit that reported work.
    fn committed(&self) {}
}
