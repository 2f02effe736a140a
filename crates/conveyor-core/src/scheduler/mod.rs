//! Scheduler - adaptive background job scheduling.
//!
//! Every tick, each job's `Starter` asks its `Tracker` whether the job is
//! due, asks its `Estimator` how much work is waiting, and launches up to
//! that many `Runner`s within the global `TaskCounter` budget. Runners drain
//! their task until it reports no work, so an idle system does not poll.
//!
//! ```text
//! tick ─▶ Starter ─▶ Tracker.should_run? ─▶ Estimator ─▶ reserve slots ─▶ spawn Runner(s)
//!                                                                            │
//!                                          Tracker.work_done ◀── no work ◀──┘
//! ```

pub mod counter;
pub mod estimator;
pub mod runner;
pub mod starter;
pub mod task;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

pub use self::counter::{Slot, TaskCounter};
pub use self::estimator::{ConstantEstimator, Estimator, PendingCountEstimator};
pub use self::runner::{Runner, RunnerExit, RunnerReport};
pub use self::starter::Starter;
pub use self::task::Task;
pub use self::tracker::{Tracker, TrackerMode};

use crate::ports::DataStore;

/// A job kind registered with the scheduler.
pub struct JobDefinition {
    pub name: String,
    pub task: Arc<dyn Task>,
    pub tracker: Arc<Tracker>,
    pub estimator: Arc<dyn Estimator>,
    /// Cap on this job's concurrent runners, below the global budget.
    pub max_runners: usize,
}

impl JobDefinition {
    pub fn new(
        task: Arc<dyn Task>,
        tracker: Tracker,
        estimator: Arc<dyn Estimator>,
    ) -> Self {
        Self {
            name: task.name().to_string(),
            task,
            tracker: Arc::new(tracker),
            estimator,
            max_runners: usize::MAX,
        }
    }

    pub fn with_max_runners(mut self, max: usize) -> Self {
        self.max_runners = max;
        self
    }
}

pub struct Scheduler {
    store: Arc<dyn DataStore>,
    counter: Arc<TaskCounter>,
    starters: Vec<Starter>,
    tick_interval: Duration,
    runners: TaskTracker,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(store: Arc<dyn DataStore>, max_concurrency: usize, tick_interval: Duration) -> Self {
        Self {
            store,
            counter: TaskCounter::new(max_concurrency),
            starters: Vec::new(),
            tick_interval,
            runners: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Jobs are ticked in registration order, so earlier jobs get first pick
    /// of free slots.
    pub fn add_job(&mut self, job: JobDefinition) {
        self.starters.push(Starter::new(job));
    }

    pub fn with_job(mut self, job: JobDefinition) -> Self {
        self.add_job(job);
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.starters.iter().map(|s| s.job().name.as_str()).collect()
    }

    pub fn counter(&self) -> &Arc<TaskCounter> {
        &self.counter
    }

    /// Run one scheduling pass over every job; returns runners launched.
    pub async fn tick_once(&self) -> usize {
        let mut launched = 0;
        for starter in &self.starters {
            if self.shutdown.is_cancelled() {
                break;
            }
            launched += starter
                .tick(&self.counter, &self.store, &self.runners, &self.shutdown)
                .await;
        }
        launched
    }

    /// Wait until every launched runner has finished.
    pub async fn wait_idle(&self) {
        self.runners.close();
        self.runners.wait().await;
        self.runners.reopen();
    }

    /// Tick until drained: stops after a tick that launched nothing and left
    /// nothing running. Meant for tests and batch hosts.
    pub async fn run_until_idle(&self) {
        loop {
            let launched = self.tick_once().await;
            self.wait_idle().await;
            if launched == 0 {
                break;
            }
        }
    }

    /// Start the tick loop in the background.
    pub fn start(self) -> SchedulerHandle {
        let shutdown = self.shutdown.clone();
        let runners = self.runners.clone();
        let counter = Arc::clone(&self.counter);
        info!(
            jobs = ?self.job_names(),
            max_concurrency = counter.max(),
            tick_ms = self.tick_interval.as_millis() as u64,
            "scheduler starting"
        );
        let join = tokio::spawn(self.tick_loop());
        SchedulerHandle {
            shutdown,
            runners,
            counter,
            join,
        }
    }

    async fn tick_loop(self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }
        debug!("tick loop stopped");
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    runners: TaskTracker,
    counter: Arc<TaskCounter>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop launching runners. Runners finish their current unit of work.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn running(&self) -> usize {
        self.counter.running()
    }

    /// Shut down and wait for every runner to drain.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        // ignore join error: a panicked tick loop has nothing left to stop
        let _ = self.join.await;
        self.runners.close();
        self.runners.wait().await;
        info!("scheduler stopped");
    }
}
