//! Runner - one concurrency slot's drain loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::task::Task;
use super::tracker::Tracker;
use crate::ports::DataStore;

/// Why a runner stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerExit {
    /// The task reported no more work.
    Drained,
    /// Shutdown was requested between two units of work.
    Shutdown,
    /// A store fault ended the loop.
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerReport {
    /// Units of work committed.
    pub committed: usize,
    pub exit: RunnerExit,
}

pub struct Runner {
    task: Arc<dyn Task>,
    store: Arc<dyn DataStore>,
    tracker: Arc<Tracker>,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(
        task: Arc<dyn Task>,
        store: Arc<dyn DataStore>,
        tracker: Arc<Tracker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            task,
            store,
            tracker,
            shutdown,
        }
    }

    /// Fetch-process-commit until the task runs dry, a fault occurs or
    /// shutdown is requested. One transaction per unit of work.
    pub async fn run(self) -> RunnerReport {
        let mut committed = 0;
        let exit = loop {
            if self.shutdown.is_cancelled() {
                break RunnerExit::Shutdown;
            }

            let mut tx = match self.store.begin().await {
                Ok(tx) => tx,
                Err(err) => {
                    error!(error = %err, "failed to begin transaction");
                    break RunnerExit::Faulted;
                }
            };

            match self.task.run_one(&mut *tx).await {
                Ok(true) => {
                    if let Err(err) = tx.commit().await {
                        error!(error = %err, "commit failed");
                        break RunnerExit::Faulted;
                    }
                    self.task.committed();
                    committed += 1;
                    // a store that never suspends must not pin this worker
                    tokio::task::yield_now().await;
                }
                Ok(false) => {
                    if let Err(err) = tx.rollback().await {
                        warn!(error = %err, "rollback of empty unit failed");
                    }
                    self.tracker.work_done();
                    break RunnerExit::Drained;
                }
                Err(err) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "rollback after fault failed");
                    }
                    error!(error = %err, "task faulted; runner stops");
                    break RunnerExit::Faulted;
                }
            }
        };

        debug!(committed, ?exit, "runner finished");
        RunnerReport { committed, exit }
    }
}
