//! Execution contexts.
//!
//! Every thread that runs task code is tagged with the context it belongs to,
//! so task bodies (and tests) can ask where they are currently running.

use std::cell::Cell;
use std::fmt;

/// Where a piece of code is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// The single main context driven by `Scheduler::on_tick`.
    Main,
    /// One of the scheduler's worker threads.
    Worker(usize),
    /// A thread the scheduler does not own (timer thread, foreign threads).
    External,
}

impl ExecutionContext {
    /// Context of the calling thread.
    #[inline]
    pub fn current() -> Self {
        CURRENT.with(|c| c.get().map(|(_, ctx)| ctx).unwrap_or(ExecutionContext::External))
    }

    /// Context of the calling thread as seen by the scheduler with `scheduler_id`.
    ///
    /// A thread that belongs to another scheduler is `External` here.
    #[inline]
    pub(crate) fn current_for(scheduler_id: u64) -> Self {
        CURRENT.with(|c| match c.get() {
            Some((id, ctx)) if id == scheduler_id => ctx,
            _ => ExecutionContext::External,
        })
    }

    /// Check if this is the main context.
    #[inline]
    pub fn is_main(&self) -> bool {
        matches!(self, ExecutionContext::Main)
    }

    /// Check if this is a worker context.
    #[inline]
    pub fn is_worker(&self) -> bool {
        matches!(self, ExecutionContext::Worker(_))
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ExecutionContext::Main => write!(f, "main"),
            ExecutionContext::Worker(i) => write!(f, "worker-{}", i),
            ExecutionContext::External => write!(f, "external"),
        }
    }
}

thread_local! {
    static CURRENT: Cell<Option<(u64, ExecutionContext)>> = const { Cell::new(None) };
}

/// Tag the calling thread. Returns the previous tag so it can be restored.
pub(crate) fn enter(
    scheduler_id: u64,
    ctx: ExecutionContext,
) -> Option<(u64, ExecutionContext)> {
    CURRENT.with(|c| c.replace(Some((scheduler_id, ctx))))
}

/// Restore a tag returned by [`enter`].
pub(crate) fn restore(previous: Option<(u64, ExecutionContext)>) {
    CURRENT.with(|c| c.set(previous));
}
