//! Task queues for the scheduler
//!
//! `TaskQueue` is the per-worker deque; `MainQueue` is the FIFO drained by the
//! host tick.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::task::Task;

/// A thread-safe task deque supporting multiple producers and consumers.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    inner: Mutex<VecDeque<Arc<Task>>>,
}

impl TaskQueue {
    /// Create a new empty task queue.
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Push a task to the back of the queue.
    #[inline]
    pub(crate) fn push(
        &self,
        task: Arc<Task>,
    ) {
        self.inner.lock().push_back(task);
    }

    /// Pop a task from the front of the queue.
    #[inline]
    pub(crate) fn pop_front(&self) -> Option<Arc<Task>> {
        self.inner.lock().pop_front()
    }

    /// Pop a task from the back of the queue (for work stealing).
    #[inline]
    pub(crate) fn pop_back(&self) -> Option<Arc<Task>> {
        self.inner.lock().pop_back()
    }

    /// Get the number of tasks in the queue.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Remove every queued task.
    pub(crate) fn drain(&self) -> Vec<Arc<Task>> {
        self.inner.lock().drain(..).collect()
    }
}

/// FIFO queue of main-lane work.
///
/// Each tick takes the whole queue as one batch, so a task that requeues
/// itself while running waits for the next tick.
#[derive(Debug, Default)]
pub(crate) struct MainQueue {
    inner: Mutex<VecDeque<Arc<Task>>>,
    available: Condvar,
}

impl MainQueue {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(
        &self,
        task: Arc<Task>,
    ) {
        self.inner.lock().push_back(task);
        self.available.notify_all();
    }

    /// Take everything queued right now, in enqueue order.
    #[inline]
    pub(crate) fn take_batch(&self) -> VecDeque<Arc<Task>> {
        std::mem::take(&mut *self.inner.lock())
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Block until something is queued or `timeout` elapses.
    pub(crate) fn wait_for_work(
        &self,
        timeout: Duration,
    ) {
        let mut inner = self.inner.lock();
        if inner.is_empty() {
            let _ = self.available.wait_for(&mut inner, timeout);
        }
    }

    pub(crate) fn drain(&self) -> Vec<Arc<Task>> {
        self.inner.lock().drain(..).collect()
    }
}
