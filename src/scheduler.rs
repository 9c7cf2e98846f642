//! Priority lanes and the drain loop.
//!
//! Non-critical work waits in one of three FIFO lanes. A single drain loop
//! per scheduler pops from the highest non-empty lane, runs the job to
//! completion, pauses for the pacing delay, and re-evaluates the lanes.
//! Critical work never enters a lane and starts immediately.
//!
//! Priority is strict: lower lanes are served only when every higher lane is
//! empty. There is no aging, so sustained high-priority load can starve the
//! low lane.

use crate::request::Priority;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A unit of queued work. It must resolve its own result.
pub(crate) type Job = BoxFuture<'static, ()>;

struct QueuedJob {
    fingerprint: String,
    job: Job,
}

/// Number of queued jobs per lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneCounts {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl LaneCounts {
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<QueuedJob>,
    normal: VecDeque<QueuedJob>,
    low: VecDeque<QueuedJob>,
}

impl Lanes {
    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<QueuedJob> {
        match priority {
            Priority::Critical | Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    fn pop_highest(&mut self) -> Option<QueuedJob> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty() && self.low.is_empty()
    }

    fn counts(&self) -> LaneCounts {
        LaneCounts {
            high: self.high.len(),
            normal: self.normal.len(),
            low: self.low.len(),
        }
    }
}

pub(crate) struct Scheduler {
    lanes: Mutex<Lanes>,
    draining: AtomicBool,
    pacing: Duration,
}

impl Scheduler {
    pub(crate) fn new(pacing: Duration) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            draining: AtomicBool::new(false),
            pacing,
        }
    }

    /// Runs critical jobs right away and queues everything else.
    pub(crate) fn submit(self: &Arc<Self>, priority: Priority, fingerprint: String, job: Job) {
        if priority == Priority::Critical {
            tracing::debug!(fingerprint = %fingerprint, "Critical request bypasses queue");
            tokio::spawn(job);
            return;
        }

        self.lanes
            .lock()
            .lane_mut(priority)
            .push_back(QueuedJob { fingerprint, job });
        self.drain();
    }

    /// Drops every queued job for `fingerprint`. Returns how many were dropped.
    pub(crate) fn remove(&self, fingerprint: &str) -> usize {
        let mut guard = self.lanes.lock();
        let lanes = &mut *guard;
        let before = lanes.counts().total();
        for lane in [&mut lanes.high, &mut lanes.normal, &mut lanes.low] {
            lane.retain(|queued| queued.fingerprint != fingerprint);
        }
        before - lanes.counts().total()
    }

    /// Drops every queued job. Returns how many were dropped.
    pub(crate) fn clear(&self) -> usize {
        let mut lanes = self.lanes.lock();
        let dropped = lanes.counts().total();
        *lanes = Lanes::default();
        dropped
    }

    pub(crate) fn queued(&self) -> LaneCounts {
        self.lanes.lock().counts()
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Starts the drain loop unless one is already running.
    fn drain(self: &Arc<Self>) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        let scheduler = Arc::clone(self);
        tokio::spawn(scheduler.run());
    }

    async fn run(self: Arc<Self>) {
        loop {
            let next = self.lanes.lock().pop_highest();
            match next {
                Some(queued) => {
                    tracing::trace!(fingerprint = %queued.fingerprint, "Dequeued request");
                    if AssertUnwindSafe(queued.job).catch_unwind().await.is_err() {
                        tracing::warn!(
                            fingerprint = %queued.fingerprint,
                            "Queued job panicked"
                        );
                    }
                    if !self.pacing.is_zero() {
                        tokio::time::sleep(self.pacing).await;
                    }
                }
                None => {
                    self.draining.store(false, Ordering::Release);
                    // A submit may have landed between the empty pop and the reset.
                    if self.lanes.lock().is_empty() || self.draining.swap(true, Ordering::AcqRel)
                    {
                        return;
                    }
                }
            }
        }
    }
}
