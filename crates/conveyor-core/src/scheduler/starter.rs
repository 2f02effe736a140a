//! Starter - decides how many runners a job gets on each tick.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info_span, warn};

use super::JobDefinition;
use super::counter::TaskCounter;
use super::runner::Runner;
use crate::ports::DataStore;

pub struct Starter {
    job: JobDefinition,
    /// Runners of this job only.
    local: Arc<TaskCounter>,
}

impl Starter {
    pub fn new(job: JobDefinition) -> Self {
        let local = TaskCounter::new(job.max_runners);
        Self { job, local }
    }

    pub fn job(&self) -> &JobDefinition {
        &self.job
    }

    pub fn running(&self) -> usize {
        self.local.running()
    }

    /// One scheduling decision. Returns the number of runners launched,
    /// never more than `min(demand, free slots)`.
    pub async fn tick(
        &self,
        global: &Arc<TaskCounter>,
        store: &Arc<dyn DataStore>,
        runners: &TaskTracker,
        shutdown: &CancellationToken,
    ) -> usize {
        if !self.job.tracker.should_run() {
            return 0;
        }

        let demand = match self.job.estimator.estimate_demand().await {
            Ok(demand) => demand,
            Err(err) => {
                warn!(job = %self.job.name, error = %err, "demand estimation failed; skipping tick");
                return 0;
            }
        };
        let desired = demand
            .min(global.available())
            .min(self.local.available());
        if desired == 0 {
            return 0;
        }

        let mut launched = 0;
        for _ in 0..desired {
            let Some(global_slot) = global.try_reserve() else {
                break;
            };
            let Some(local_slot) = self.local.try_reserve() else {
                break;
            };

            let slot = self.local.running();
            let span = info_span!("runner", job = %self.job.name, slot);
            let runner = Runner::new(
                Arc::clone(&self.job.task),
                Arc::clone(store),
                Arc::clone(&self.job.tracker),
                shutdown.child_token(),
            );
            runners.spawn(
                async move {
                    // released when the runner ends, however it ends
                    let _slots = (global_slot, local_slot);
                    runner.run().await
                }
                .instrument(span),
            );
            launched += 1;
        }

        debug!(job = %self.job.name, demand, launched, "tick");
        launched
    }
}
