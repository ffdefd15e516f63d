//! # Operation Queue
//!
//! In-process work queue for one operation type. Operation IDs are either
//! ready, delayed until an instant, or in flight; an ID is never in more than
//! one of those places, so at most one executor run per operation exists.
//!
//! Delayed IDs live in a min-heap keyed by due time. Idle workers sleep until
//! the earliest due time or until new work arrives, never per item.

use futures::FutureExt;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{ExecutionOutcome, OperationExecutor};
use super::statistics::{QueueStatistics, QueueStatisticsSnapshot};

/// Delay before re-running an operation whose executor panicked
pub const PANIC_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheduled {
    Ready,
    At(Instant),
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedEntry {
    due: Instant,
    seq: u64,
    operation_id: String,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<String>,
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    scheduled: HashMap<String, Scheduled>,
    in_flight: HashSet<String>,
    seq: u64,
}

enum Next {
    Run(String),
    Wait(Option<Instant>),
}

impl QueueState {
    /// Move every delayed entry that is due onto the ready list
    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse(entry)) = self.delayed.peek() {
            if entry.due > now {
                break;
            }
            let Some(Reverse(entry)) = self.delayed.pop() else {
                break;
            };
            // Entries superseded by an earlier schedule or an immediate add are stale
            if self.scheduled.get(&entry.operation_id) == Some(&Scheduled::At(entry.due)) {
                self.scheduled
                    .insert(entry.operation_id.clone(), Scheduled::Ready);
                self.ready.push_back(entry.operation_id);
            }
        }
    }

    fn next(&mut self, now: Instant) -> Next {
        self.promote_due(now);
        match self.ready.pop_front() {
            Some(id) => {
                self.scheduled.remove(&id);
                self.in_flight.insert(id.clone());
                Next::Run(id)
            }
            None => Next::Wait(self.delayed.peek().map(|Reverse(entry)| entry.due)),
        }
    }

    fn schedule_at(&mut self, operation_id: String, due: Instant) {
        self.seq += 1;
        self.scheduled
            .insert(operation_id.clone(), Scheduled::At(due));
        self.delayed.push(Reverse(DelayedEntry {
            due,
            seq: self.seq,
            operation_id,
        }));
    }
}

#[derive(Debug)]
pub struct OperationQueue {
    name: String,
    workers: usize,
    executor: Arc<dyn OperationExecutor>,
    state: Mutex<QueueState>,
    notify: Notify,
    stats: QueueStatistics,
}

impl OperationQueue {
    pub fn new(name: impl Into<String>, workers: usize, executor: Arc<dyn OperationExecutor>) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            executor,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            stats: QueueStatistics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Schedule `operation_id` for immediate execution.
    ///
    /// Returns `false` when the ID was already ready or in flight and the call
    /// was absorbed. A delayed ID is promoted to ready.
    pub fn add(&self, operation_id: &str) -> bool {
        let mut state = self.lock();
        if state.in_flight.contains(operation_id) {
            drop(state);
            self.stats.record_coalesced();
            return false;
        }

        match state.scheduled.get(operation_id) {
            Some(Scheduled::Ready) => {
                drop(state);
                self.stats.record_coalesced();
                return false;
            }
            Some(Scheduled::At(_)) | None => {
                state
                    .scheduled
                    .insert(operation_id.to_string(), Scheduled::Ready);
                state.ready.push_back(operation_id.to_string());
            }
        }
        drop(state);

        debug!(queue = %self.name, operation_id = %operation_id, "Operation added");
        self.notify.notify_one();
        true
    }

    /// Schedule `operation_id` no earlier than `delay` from now; keeps an earlier existing schedule
    pub fn add_after(&self, operation_id: &str, delay: Duration) -> bool {
        let due = Instant::now() + delay;
        let mut state = self.lock();
        if state.in_flight.contains(operation_id) {
            drop(state);
            self.stats.record_coalesced();
            return false;
        }

        match state.scheduled.get(operation_id) {
            Some(Scheduled::Ready) => {
                drop(state);
                self.stats.record_coalesced();
                return false;
            }
            Some(Scheduled::At(existing)) if *existing <= due => {
                drop(state);
                self.stats.record_coalesced();
                return false;
            }
            _ => state.schedule_at(operation_id.to_string(), due),
        }
        drop(state);

        // A sleeping worker may be waiting on a later deadline
        self.notify.notify_one();
        true
    }

    pub fn is_scheduled(&self, operation_id: &str) -> bool {
        self.lock().scheduled.contains_key(operation_id)
    }

    pub fn is_in_flight(&self, operation_id: &str) -> bool {
        self.lock().in_flight.contains(operation_id)
    }

    /// Ready plus delayed IDs
    pub fn len(&self) -> usize {
        self.lock().scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.scheduled.is_empty() && state.in_flight.is_empty()
    }

    pub fn statistics(&self) -> QueueStatisticsSnapshot {
        let state = self.lock();
        self.stats
            .snapshot(state.scheduled.len(), state.in_flight.len())
    }

    /// Run the worker pool until `shutdown` is cancelled.
    ///
    /// Cancellation stops workers from taking new IDs; runs already in flight
    /// complete before this returns.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(queue = %self.name, workers = self.workers, "Starting operation queue workers");

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let queue = Arc::clone(&self);
            let shutdown = shutdown.clone();
            workers.spawn(async move { queue.worker_loop(worker_id, shutdown).await });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(queue = %self.name, error = %e, "Queue worker terminated abnormally");
            }
        }

        info!(queue = %self.name, "Operation queue workers stopped");
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        loop {
            // Register for wakeups before inspecting state so no add is missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shutdown.is_cancelled() {
                break;
            }

            let next = self.lock().next(Instant::now());
            match next {
                Next::Run(operation_id) => {
                    // Hand any remaining ready work to an idle worker
                    if !self.lock().ready.is_empty() {
                        self.notify.notify_one();
                    }
                    self.process(worker_id, operation_id).await;
                }
                Next::Wait(Some(due)) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                Next::Wait(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = &mut notified => {}
                    }
                }
            }
        }

        debug!(queue = %self.name, worker_id = worker_id, "Queue worker exiting");
    }

    async fn process(&self, worker_id: usize, operation_id: String) {
        debug!(queue = %self.name, worker_id = worker_id, operation_id = %operation_id, "Executing operation");

        let outcome = match AssertUnwindSafe(self.executor.execute(&operation_id))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                self.stats.record_panic();
                error!(
                    queue = %self.name,
                    operation_id = %operation_id,
                    "Executor panicked, rescheduling operation"
                );
                ExecutionOutcome::RequeueAfter(PANIC_RETRY_DELAY)
            }
        };
        self.stats.record_outcome(&outcome);

        let mut state = self.lock();
        state.in_flight.remove(&operation_id);
        if let ExecutionOutcome::RequeueAfter(delay) = outcome {
            state.schedule_at(operation_id, Instant::now() + delay);
            drop(state);
            self.notify.notify_one();
        } else {
            drop(state);
            if matches!(outcome, ExecutionOutcome::Dropped) {
                warn!(queue = %self.name, operation_id = %operation_id, "Operation dropped from queue");
            }
        }
    }
}
