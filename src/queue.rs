//! Bounded joinable task queue
//!
//! [`TaskQueue`] carries work items from the producer to the worker pool.
//! Enqueueing blocks while the queue holds `capacity` items, which is the
//! only backpressure in the pipeline. Every dequeued item must be
//! acknowledged with [`TaskQueue::mark_done`], and [`TaskQueue::join_all`]
//! returns once every enqueued item (jobs and stop sentinels) has been
//! acknowledged.
//!
//! The queue doubles as the failure latch of a run: once [`TaskQueue::fail`]
//! is called, producers stop being admitted, idle workers are released and
//! `join_all` returns the failure instead of waiting.
//!
//! A stall watchdog guards every wait on the coordinator side. When no item
//! is dequeued or acknowledged for the stall timeout, the queue latches
//! [`WorkerFailure::Stalled`], whether the coordinator is parked in
//! `join_all` or in an enqueue on a full queue.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::WorkerFailure;

/// Default number of items the queue holds before producers block
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Shortest stall timeout the watchdog honours
pub const MIN_STALL_TIMEOUT: Duration = Duration::from_millis(1);

/// Longest interval between two watchdog checks
const WATCHDOG_TICK: Duration = Duration::from_millis(50);

/// An item handed to a worker
#[derive(Debug)]
pub enum Task<T> {
    /// A unit of work
    Job(T),
    /// Instructs the receiving worker to exit
    Stop,
}

/// Counters describing the queue's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub jobs_enqueued: usize,
    pub jobs_dequeued: usize,
    pub sentinels_enqueued: usize,
    pub sentinels_consumed: usize,
    /// Number of enqueue calls that had to wait for capacity
    pub producer_waits: usize,
    /// Largest number of items ever held at once
    pub peak_len: usize,
}

struct State<T> {
    items: VecDeque<Task<T>>,
    /// Enqueued items not yet acknowledged
    unfinished: usize,
    /// Bumped on every dequeue and acknowledgement
    progress: u64,
    failure: Option<WorkerFailure>,
    stats: QueueStats,
}

/// Tracks the time since workers last made progress
struct Watchdog {
    timeout: Duration,
    last_progress: u64,
    last_change: Instant,
}
impl Watchdog {
    fn new(timeout: Duration, progress: u64) -> Self {
        Self {
            timeout: timeout.max(MIN_STALL_TIMEOUT),
            last_progress: progress,
            last_change: Instant::now(),
        }
    }

    fn tick(&self) -> Duration {
        WATCHDOG_TICK.min(self.timeout)
    }

    /// The stall to latch, if outstanding items saw no progress for too long
    fn check<T>(&mut self, state: &State<T>) -> Option<WorkerFailure> {
        if state.progress != self.last_progress {
            self.last_progress = state.progress;
            self.last_change = Instant::now();
            return None;
        }
        let waited = self.last_change.elapsed();
        (state.unfinished > 0 && state.failure.is_none() && waited >= self.timeout).then_some(
            WorkerFailure::Stalled {
                waited,
                outstanding: state.unfinished,
            },
        )
    }
}

/// A bounded multi-producer multi-consumer queue with a join barrier
pub struct TaskQueue<T> {
    capacity: usize,
    /// Bounds the producer's wait for capacity; unbounded when `None`
    stall_timeout: Option<Duration>,
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    all_done: Condvar,
}
impl<T> TaskQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            stall_timeout: None,
            state: Mutex::new(State {
                items: VecDeque::new(),
                unfinished: 0,
                progress: 0,
                failure: None,
                stats: QueueStats::default(),
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    /// Fail the run when an enqueue waits `timeout` without worker progress
    #[must_use]
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout.max(MIN_STALL_TIMEOUT));
        self
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently waiting in the queue
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, task: Task<T>) -> Result<(), WorkerFailure> {
        let mut state = self.state.lock();
        let mut waited = false;
        let mut watchdog = self
            .stall_timeout
            .map(|timeout| Watchdog::new(timeout, state.progress));
        while state.failure.is_none() && state.items.len() >= self.capacity {
            waited = true;
            let Some(watchdog) = watchdog.as_mut() else {
                self.not_full.wait(&mut state);
                continue;
            };
            self.not_full.wait_for(&mut state, watchdog.tick());
            if let Some(failure) = watchdog.check(&state) {
                Self::latch(&mut state, failure.clone());
                self.wake_all();
                return Err(failure);
            }
        }
        if state.failure.is_some() {
            return Err(WorkerFailure::Aborted);
        }
        if waited {
            state.stats.producer_waits += 1;
        }
        match task {
            Task::Job(_) => state.stats.jobs_enqueued += 1,
            Task::Stop => state.stats.sentinels_enqueued += 1,
        }
        state.items.push_back(task);
        state.unfinished += 1;
        state.stats.peak_len = state.stats.peak_len.max(state.items.len());
        self.not_empty.notify_one();
        Ok(())
    }

    /// Add a job, blocking while the queue is full
    ///
    /// Fails with [`WorkerFailure::Aborted`] once the run has failed, or with
    /// [`WorkerFailure::Stalled`] when the queue has a stall timeout and the
    /// workers stop making progress while it is full.
    pub fn enqueue(&self, item: T) -> Result<(), WorkerFailure> {
        self.push(Task::Job(item))
    }

    /// Add one stop sentinel per worker
    pub fn enqueue_sentinels(&self, num_workers: usize) -> Result<(), WorkerFailure> {
        for _ in 0..num_workers {
            self.push(Task::Stop)?;
        }
        debug!("Enqueued {num_workers} stop sentinel(s)");
        Ok(())
    }

    /// Take the next item, blocking while the queue is empty
    ///
    /// Returns `None` once the run has failed; queued items are abandoned.
    pub fn dequeue(&self) -> Option<Task<T>> {
        let mut state = self.state.lock();
        loop {
            if state.failure.is_some() {
                return None;
            }
            if let Some(task) = state.items.pop_front() {
                match task {
                    Task::Job(_) => state.stats.jobs_dequeued += 1,
                    Task::Stop => state.stats.sentinels_consumed += 1,
                }
                state.progress += 1;
                self.not_full.notify_one();
                return Some(task);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Acknowledge one dequeued item
    pub fn mark_done(&self) {
        let mut state = self.state.lock();
        if state.unfinished == 0 {
            warn!("mark_done called more times than items were enqueued");
            return;
        }
        state.unfinished -= 1;
        state.progress += 1;
        if state.unfinished == 0 {
            self.all_done.notify_all();
        }
    }

    /// Wait until every enqueued item has been acknowledged
    ///
    /// If no item is dequeued or acknowledged for `stall_timeout` while items
    /// are outstanding, the queue is failed with [`WorkerFailure::Stalled`].
    pub fn join_all(&self, stall_timeout: Duration) -> Result<(), WorkerFailure> {
        let mut state = self.state.lock();
        let mut watchdog = Watchdog::new(stall_timeout, state.progress);
        loop {
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }
            if state.unfinished == 0 {
                return Ok(());
            }
            self.all_done.wait_for(&mut state, watchdog.tick());
            if let Some(failure) = watchdog.check(&state) {
                Self::latch(&mut state, failure.clone());
                self.wake_all();
                return Err(failure);
            }
        }
    }

    /// Mark the run as failed and release every blocked party
    ///
    /// The first failure wins; later calls are ignored.
    pub fn fail(&self, failure: WorkerFailure) {
        let mut state = self.state.lock();
        Self::latch(&mut state, failure);
        self.wake_all();
    }

    /// The failure latched on this queue, if any
    #[must_use]
    pub fn failure(&self) -> Option<WorkerFailure> {
        self.state.lock().failure.clone()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }

    fn latch(state: &mut State<T>, failure: WorkerFailure) {
        if state.failure.is_none() {
            warn!("Shutting down task queue: {failure}");
            state.failure = Some(failure);
            // Abandoned items will never be acknowledged
            state.items.clear();
        }
    }

    fn wake_all(&self) {
        self.not_full.notify_all();
        self.not_empty.notify_all();
        self.all_done.notify_all();
    }
}
