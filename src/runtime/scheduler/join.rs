//! Join handles and task completion.
//!
//! The completion slot is shared between a running task and its
//! [`JoinHandle`]. It decides what happens to a task's outcome: handed to an
//! awaiting caller, handed to an attached continuation, or, for a fault with
//! nobody left to look at it, counted as unobserved and dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::task::{Header, TaskId, TaskState};
use super::{SchedulerStats, Shared};
use crate::runtime::cancel::Cancelled;

/// Why a task did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The work returned an error or panicked. The original error is kept as is.
    #[error(transparent)]
    Faulted(anyhow::Error),
    /// The work observed a cancellation at a suspension point.
    #[error("task was cancelled")]
    Cancelled,
    /// The scheduler shut down before the task could finish.
    #[error("task was abandoned by a scheduler shutdown")]
    Abandoned,
    /// The outcome was already taken through this handle (`try_result`,
    /// `wait_timeout` or an earlier poll).
    #[error("task outcome was already taken")]
    AlreadyTaken,
}

impl TaskError {
    /// Classify the error returned by a task body.
    pub(crate) fn from_work(err: anyhow::Error) -> Self {
        if err.downcast_ref::<Cancelled>().is_some() {
            TaskError::Cancelled
        } else {
            TaskError::Faulted(err)
        }
    }

    /// Check if this is a fault.
    #[inline]
    pub fn is_faulted(&self) -> bool {
        matches!(self, TaskError::Faulted(_))
    }

    /// Check if this is a cancellation.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Outcome handed to continuations; the value itself is discarded.
pub(crate) type Outcome = Result<(), TaskError>;
pub(crate) type Continuation = Box<dyn FnOnce(Outcome) + Send + 'static>;

struct Slot<T> {
    result: Option<Result<T, TaskError>>,
    finished: bool,
    detached: bool,
    waker: Option<Waker>,
    continuation: Option<Continuation>,
}

pub(crate) struct Completion<T> {
    header: Arc<Header>,
    stats: Arc<SchedulerStats>,
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Completion<T> {
    pub(crate) fn new(
        header: Arc<Header>,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        Self {
            header,
            stats,
            slot: Mutex::new(Slot {
                result: None,
                finished: false,
                detached: false,
                waker: None,
                continuation: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Record the outcome. Only the first call has any effect.
    pub(crate) fn finish(
        &self,
        result: Result<T, TaskError>,
    ) {
        let mut slot = self.slot.lock();
        if slot.finished {
            return;
        }
        slot.finished = true;

        let state = match &result {
            Ok(_) => TaskState::Completed,
            Err(TaskError::Faulted(_)) => TaskState::Faulted,
            Err(_) => TaskState::Cancelled,
        };
        self.header.set_state(state);
        match &result {
            Err(TaskError::Abandoned) => self.stats.record_abandoned(),
            _ => self.stats.record_finished(state),
        }
        debug!("{} ({}) finished: {:?}", self.header.id(), self.header.name(), state);

        if let Some(continuation) = slot.continuation.take() {
            drop(slot);
            continuation(result.map(drop));
            return;
        }

        if slot.detached {
            drop(slot);
            if let Err(TaskError::Faulted(_)) = result {
                self.stats.record_unobserved();
            }
            return;
        }

        slot.result = Some(result);
        let waker = slot.waker.take();
        drop(slot);
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Attach a continuation that receives the outcome exactly once.
    ///
    /// Runs inline on the finishing thread, or right away on the caller if
    /// the task already finished and its outcome was not taken yet.
    pub(crate) fn on_finish(
        &self,
        continuation: Continuation,
    ) {
        let mut slot = self.slot.lock();
        if !slot.finished {
            slot.continuation = Some(continuation);
            return;
        }
        let result = slot.result.take();
        drop(slot);
        if let Some(result) = result {
            continuation(result.map(drop));
        }
    }

    fn detach(&self) {
        let mut slot = self.slot.lock();
        slot.detached = true;
        slot.waker = None;
        let result = slot.result.take();
        drop(slot);
        if let Some(Err(TaskError::Faulted(_))) = result {
            self.stats.record_unobserved();
        }
    }
}

/// An owned permission to await a task's outcome.
///
/// Dropping the handle detaches the task: it keeps running, but a fault it
/// raises afterwards has no observer and is only counted as unobserved. Use
/// [`Forget`](crate::runtime::forget::Forget) to keep faults observable.
pub struct JoinHandle<T> {
    completion: Arc<Completion<T>>,
    shared: Weak<Shared>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(
        completion: Arc<Completion<T>>,
        shared: Weak<Shared>,
    ) -> Self {
        Self { completion, shared }
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.completion.header.id()
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> &str {
        self.completion.header.name()
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.completion.header.state()
    }

    /// Check if the task has finished.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.completion.slot.lock().finished
    }

    /// Take the outcome if the task already finished.
    ///
    /// The outcome is handed out once; awaiting the handle afterwards resolves
    /// to [`TaskError::AlreadyTaken`].
    pub fn try_result(&mut self) -> Option<Result<T, TaskError>> {
        self.completion.slot.lock().result.take()
    }

    /// Block the calling thread until the task finishes or `timeout` elapses.
    ///
    /// Main-lane tasks only progress inside `Scheduler::on_tick`, so calling
    /// this on the main thread for such a task can only time out.
    pub fn wait_timeout(
        &mut self,
        timeout: Duration,
    ) -> Option<Result<T, TaskError>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.completion.slot.lock();
        loop {
            if let Some(result) = slot.result.take() {
                return Some(result);
            }
            if self
                .completion
                .ready
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                return slot.result.take();
            }
        }
    }

    /// Drop the handle on purpose. Same as `drop`, reads better at call sites.
    #[inline]
    pub fn detach(self) {}

    pub(crate) fn completion(&self) -> &Arc<Completion<T>> {
        &self.completion
    }

    pub(crate) fn shared(&self) -> Option<Arc<Shared>> {
        self.shared.upgrade()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let mut slot = self.completion.slot.lock();
        if let Some(result) = slot.result.take() {
            return Poll::Ready(result);
        }
        if slot.finished {
            return Poll::Ready(Err(TaskError::AlreadyTaken));
        }
        match &slot.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => slot.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        self.completion.detach();
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
