//! # Queue Statistics
//!
//! Atomic counters per operation queue. Long-lived `scheduled` counts with a
//! flat `processed` count point at operations stuck waiting on a stage.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::executor::ExecutionOutcome;

#[derive(Debug, Default)]
pub struct QueueStatistics {
    /// Executor runs started
    pub(crate) processed: AtomicU64,
    pub(crate) succeeded: AtomicU64,
    pub(crate) failed: AtomicU64,
    /// Runs that ended in a delayed re-enqueue
    pub(crate) requeued: AtomicU64,
    /// Runs that found nothing to do (missing or already terminal)
    pub(crate) skipped: AtomicU64,
    /// `add` calls absorbed because the ID was already scheduled or running
    pub(crate) coalesced: AtomicU64,
    pub(crate) panics: AtomicU64,
}

impl QueueStatistics {
    pub(crate) fn record_outcome(&self, outcome: &ExecutionOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ExecutionOutcome::Succeeded => &self.succeeded,
            ExecutionOutcome::Failed => &self.failed,
            ExecutionOutcome::RequeueAfter(_) => &self.requeued,
            ExecutionOutcome::AlreadyTerminal | ExecutionOutcome::Dropped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, scheduled: usize, in_flight: usize) -> QueueStatisticsSnapshot {
        QueueStatisticsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            scheduled,
            in_flight,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatisticsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub requeued: u64,
    pub skipped: u64,
    pub coalesced: u64,
    pub panics: u64,
    /// IDs waiting, ready or delayed
    pub scheduled: usize,
    pub in_flight: usize,
}
