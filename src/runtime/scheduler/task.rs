//! Task definitions for the scheduler.
//!
//! A task is a boxed future plus the policy that decides where it starts and
//! where it comes back after every suspension point.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;
use tracing::trace;

use super::context::ExecutionContext;
use super::join::TaskError;
use super::{SchedulerStats, Shared};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, never polled.
    Pending,
    /// Currently being polled.
    Running,
    /// Waiting at a suspension point.
    Suspended,
    /// Finished with a value.
    Completed,
    /// Finished with an error or a panic.
    Faulted,
    /// Observed a cancellation, or was dropped by a shutting-down scheduler.
    Cancelled,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => TaskState::Running,
            2 => TaskState::Suspended,
            3 => TaskState::Completed,
            4 => TaskState::Faulted,
            5 => TaskState::Cancelled,
            _ => TaskState::Pending,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Suspended => 2,
            TaskState::Completed => 3,
            TaskState::Faulted => 4,
            TaskState::Cancelled => 5,
        }
    }

    /// Check if the task can no longer make progress.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Faulted | TaskState::Cancelled
        )
    }
}

/// Where a task's first poll happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lane {
    /// The main queue, drained by `Scheduler::on_tick`.
    #[default]
    Main,
    /// The worker pool.
    Worker,
}

/// Where a task is polled after it is woken from a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Always back on the main context.
    #[default]
    MainContext,
    /// On whichever worker picks it up. Intentionally not deterministic.
    Unspecified,
}

/// Task builder for constructing tasks with various options.
#[derive(Debug, Clone, Default)]
pub struct TaskBuilder {
    name: Option<String>,
    lane: Lane,
    resume_on: ResumePolicy,
}

impl TaskBuilder {
    /// Create a new task builder (main lane, pinned to the main context).
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task name.
    #[inline]
    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the lane of the first poll.
    #[inline]
    pub fn lane(
        mut self,
        lane: Lane,
    ) -> Self {
        self.lane = lane;
        self
    }

    /// Set the resume policy.
    #[inline]
    pub fn resume_on(
        mut self,
        policy: ResumePolicy,
    ) -> Self {
        self.resume_on = policy;
        self
    }

    pub(crate) fn into_header(
        self,
        id: TaskId,
    ) -> Header {
        let name = self.name.unwrap_or_else(|| id.to_string());
        Header::new(id, name, self.lane, self.resume_on)
    }
}

/// Generator for task IDs.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
        }
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// Task metadata shared by the runnable task and its join handle.
#[derive(Debug)]
pub(crate) struct Header {
    id: TaskId,
    name: String,
    lane: Lane,
    policy: ResumePolicy,
    state: AtomicU8,
    last_context: Mutex<Option<ExecutionContext>>,
}

impl Header {
    pub(crate) fn new(
        id: TaskId,
        name: String,
        lane: Lane,
        policy: ResumePolicy,
    ) -> Self {
        Self {
            id,
            name,
            lane,
            policy,
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            last_context: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn lane(&self) -> Lane {
        self.lane
    }

    #[inline]
    pub(crate) fn policy(&self) -> ResumePolicy {
        self.policy
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn set_state(
        &self,
        state: TaskState,
    ) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Record the context of the current poll, returning the previous one.
    fn swap_context(
        &self,
        ctx: ExecutionContext,
    ) -> Option<ExecutionContext> {
        self.last_context.lock().replace(ctx)
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type AbortFn = Box<dyn Fn(TaskError) + Send + Sync + 'static>;

/// A runnable task: the erased future plus what is needed to reschedule it.
pub(crate) struct Task {
    header: Arc<Header>,
    future: Mutex<Option<BoxFuture>>,
    /// Resolves the join side when the future can no longer finish by itself.
    abort: AbortFn,
    /// Set while the task sits in a queue, so repeated wakes enqueue once.
    queued: AtomicBool,
    shared: Weak<Shared>,
}

impl std::fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.header.id)
            .field("name", &self.header.name)
            .field("state", &self.header.state())
            .field("lane", &self.header.lane)
            .field("policy", &self.header.policy)
            .finish()
    }
}

impl Task {
    pub(crate) fn new(
        header: Arc<Header>,
        future: BoxFuture,
        abort: AbortFn,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            header,
            future: Mutex::new(Some(future)),
            abort,
            queued: AtomicBool::new(false),
            shared,
        }
    }

    #[inline]
    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    /// Mark the task as queued. Returns false if it already was.
    #[inline]
    pub(crate) fn mark_queued(&self) -> bool {
        !self.queued.swap(true, Ordering::SeqCst)
    }

    /// Poll the task once on `ctx`.
    pub(crate) fn run(
        self: &Arc<Self>,
        ctx: ExecutionContext,
        stats: &SchedulerStats,
    ) {
        let mut slot = self.future.lock();
        // Cleared before polling so a wake issued during the poll requeues.
        self.queued.store(false, Ordering::SeqCst);

        let Some(future) = slot.as_mut() else {
            return;
        };

        if let Some(previous) = self.header.swap_context(ctx) {
            if previous != ctx {
                stats.record_context_switch();
            }
        }
        self.header.set_state(TaskState::Running);
        trace!("polling {} ({}) on {}", self.header.id, self.header.name, ctx);

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Ready(())) => {
                *slot = None;
            }
            Ok(Poll::Pending) => {
                self.header.set_state(TaskState::Suspended);
            }
            Err(payload) => {
                *slot = None;
                drop(slot);
                let message = panic_message(payload.as_ref());
                (self.abort)(TaskError::Faulted(anyhow::anyhow!(
                    "task panicked: {}",
                    message
                )));
            }
        }
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.mark_queued() {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.schedule_resume(self.clone());
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.future.get_mut().take().is_some() {
            (self.abort)(TaskError::Abandoned);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
