//! TaskCounter - bounded count of running runners.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct TaskCounter {
    max: usize,
    running: AtomicUsize,
}

impl TaskCounter {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            max,
            running: AtomicUsize::new(0),
        })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Free slots right now. Never negative.
    pub fn available(&self) -> usize {
        self.max.saturating_sub(self.running())
    }

    /// Take one slot, or `None` when all are in use.
    ///
    /// The slot is given back when the returned guard drops, so a runner that
    /// panics or errors still releases it.
    pub fn try_reserve(self: &Arc<Self>) -> Option<Slot> {
        self.running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                (running < self.max).then_some(running + 1)
            })
            .ok()
            .map(|_| Slot {
                counter: Arc::clone(self),
            })
    }
}

/// One reserved slot.
#[derive(Debug)]
pub struct Slot {
    counter: Arc<TaskCounter>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.counter.running.fetch_sub(1, Ordering::AcqRel);
    }
}
