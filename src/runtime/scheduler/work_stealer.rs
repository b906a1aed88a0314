//! Worker pool queues with work stealing.
//!
//! New worker-lane tasks are placed round-robin. Resumptions of tasks with an
//! unspecified resume policy land on a random worker, and idle workers steal
//! from the back of other workers' queues, so a suspended task generally comes
//! back on a different thread than the one it left.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::Rng;

use super::queue::TaskQueue;
use super::task::Task;

/// Statistics about work stealing operations.
#[derive(Debug, Default)]
pub struct StealStats {
    /// Number of successful steals.
    pub steal_successes: AtomicUsize,
    /// Number of failed steal attempts.
    pub steal_failures: AtomicUsize,
}

impl StealStats {
    #[inline]
    fn record_success(&self) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self) {
        self.steal_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        let successes = self.steal_successes.load(Ordering::Relaxed);
        let total = successes + self.steal_failures.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        successes as f64 / total as f64
    }
}

/// Per-worker queues plus the parking spot for idle workers.
#[derive(Debug)]
pub(crate) struct WorkStealer {
    queues: Vec<TaskQueue>,
    next_worker: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
    stats: StealStats,
}

impl WorkStealer {
    /// Create a work stealer with the given number of workers (at least one).
    pub(crate) fn new(num_workers: usize) -> Self {
        let queues = (0..num_workers.max(1)).map(|_| TaskQueue::new()).collect();
        Self {
            queues,
            next_worker: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            stats: StealStats::default(),
        }
    }

    #[inline]
    pub(crate) fn num_workers(&self) -> usize {
        self.queues.len()
    }

    /// Queue a task on the next worker in turn.
    pub(crate) fn push_round_robin(
        &self,
        task: Arc<Task>,
    ) {
        let worker_id = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.push_to(worker_id, task);
    }

    /// Queue a task on a randomly chosen worker.
    pub(crate) fn push_random(
        &self,
        task: Arc<Task>,
    ) {
        let worker_id = rand::rng().random_range(0..self.queues.len());
        self.push_to(worker_id, task);
    }

    pub(crate) fn push_to(
        &self,
        worker_id: usize,
        task: Arc<Task>,
    ) {
        self.queues[worker_id % self.queues.len()].push(task);
        self.idle.notify_all();
    }

    /// Next task for `worker_id`: its own queue first, then a steal.
    pub(crate) fn find_task(
        &self,
        worker_id: usize,
    ) -> Option<Arc<Task>> {
        if let Some(task) = self.queues[worker_id].pop_front() {
            return Some(task);
        }
        self.steal(worker_id)
    }

    /// Steal from the back of another worker's queue, starting at a random victim.
    fn steal(
        &self,
        thief: usize,
    ) -> Option<Arc<Task>> {
        let n = self.queues.len();
        if n < 2 {
            return None;
        }
        let start = rand::rng().random_range(0..n);
        for offset in 0..n {
            let victim = (start + offset) % n;
            if victim == thief {
                continue;
            }
            if let Some(task) = self.queues[victim].pop_back() {
                self.stats.record_success();
                return Some(task);
            }
        }
        self.stats.record_failure();
        None
    }

    /// Park an idle worker until new work arrives or `timeout` elapses.
    pub(crate) fn wait_idle(
        &self,
        timeout: Duration,
    ) {
        let mut guard = self.idle_lock.lock();
        let _ = self.idle.wait_for(&mut guard, timeout);
    }

    pub(crate) fn notify_all(&self) {
        self.idle.notify_all();
    }

    /// Total queued tasks across all workers.
    pub(crate) fn len(&self) -> usize {
        self.queues.iter().map(TaskQueue::len).sum()
    }

    /// Remove every queued task.
    pub(crate) fn drain(&self) -> Vec<Arc<Task>> {
        self.queues.iter().flat_map(TaskQueue::drain).collect()
    }

    #[inline]
    pub(crate) fn stats(&self) -> &StealStats {
        &self.stats
    }
}
