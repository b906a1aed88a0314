//! Fire-and-forget with observed faults.
//!
//! Dropping a [`JoinHandle`] leaves a later fault with nobody to look at it.
//! [`Forget`] consumes the handle instead and guarantees that a fault reaches
//! a [`ReportSink`] exactly once, while success and cancellation stay silent.
//!
//! Three strategies give the same guarantee and differ only in where the
//! sink runs:
//!
//! | strategy | sink runs on |
//! |---|---|
//! | [`ForgetStrategy::AwaitCatch`] | the caller's lane (main when forgotten from main) |
//! | [`ForgetStrategy::OnFaultContinuation`] | the context that finished the task |
//! | [`ForgetStrategy::DetachedAwaitCatch`] | a worker |

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::error;

use crate::runtime::scheduler::join::Outcome;
use crate::runtime::scheduler::{
    ExecutionContext, JoinHandle, Lane, ResumePolicy, SchedulerStats, TaskBuilder, TaskError,
};

/// Where observed faults go.
pub trait ReportSink: Send + Sync {
    fn report(
        &self,
        error: &anyhow::Error,
    );
}

impl<F> ReportSink for F
where
    F: Fn(&anyhow::Error) + Send + Sync,
{
    fn report(
        &self,
        error: &anyhow::Error,
    ) {
        self(error)
    }
}

/// Default sink: logs the full error chain at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(
        &self,
        error: &anyhow::Error,
    ) {
        error!(context = %ExecutionContext::current(), "task fault: {:#}", error);
    }
}

/// How a forgotten task is watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForgetStrategy {
    /// A watcher task awaits the handle on the caller's lane and catches.
    #[default]
    AwaitCatch,
    /// A continuation attached to the task runs only when it faults.
    OnFaultContinuation,
    /// A watcher task on the worker lane, with no context affinity.
    DetachedAwaitCatch,
}

/// Progress of a forgotten task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetState {
    /// Still running.
    Started,
    /// Finished with a value; nothing reported.
    Succeeded,
    /// Cancelled or abandoned; nothing reported.
    Discarded,
    /// Faulted, report in progress.
    Faulted,
    /// Faulted and reported.
    Reported,
}

impl ForgetState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => ForgetState::Succeeded,
            2 => ForgetState::Discarded,
            3 => ForgetState::Faulted,
            4 => ForgetState::Reported,
            _ => ForgetState::Started,
        }
    }

    fn as_u8(&self) -> u8 {
        match self {
            ForgetState::Started => 0,
            ForgetState::Succeeded => 1,
            ForgetState::Discarded => 2,
            ForgetState::Faulted => 3,
            ForgetState::Reported => 4,
        }
    }

    /// Check if no further transition can happen.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ForgetState::Succeeded | ForgetState::Discarded | ForgetState::Reported
        )
    }
}

/// Receipt for a forgotten task. Holding it is optional.
#[derive(Debug, Clone)]
pub struct Forgotten {
    state: Arc<AtomicU8>,
}

impl Forgotten {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ForgetState::Started.as_u8())),
        }
    }

    #[inline]
    pub fn state(&self) -> ForgetState {
        ForgetState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set(
        &self,
        state: ForgetState,
    ) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Delivers one outcome to a sink.
struct Observer {
    sink: Arc<dyn ReportSink>,
    receipt: Forgotten,
    stats: Option<Arc<SchedulerStats>>,
}

impl Observer {
    fn observe(
        self,
        outcome: Outcome,
    ) {
        match outcome {
            Ok(()) => self.receipt.set(ForgetState::Succeeded),
            Err(TaskError::Faulted(err)) => {
                self.receipt.set(ForgetState::Faulted);
                let sink = &self.sink;
                if panic::catch_unwind(AssertUnwindSafe(|| sink.report(&err))).is_err() {
                    error!("report sink panicked while reporting: {:#}", err);
                }
                if let Some(stats) = &self.stats {
                    stats.record_reported();
                }
                self.receipt.set(ForgetState::Reported);
            }
            Err(_) => self.receipt.set(ForgetState::Discarded),
        }
    }
}

/// Watcher body: awaits the forgotten handle and observes its outcome.
///
/// If the watcher is dropped before it saw the outcome (its own task was
/// abandoned by a shutdown), the observer moves onto the watched completion,
/// so the outcome is still delivered exactly once.
struct Watch<T> {
    handle: Option<JoinHandle<T>>,
    observer: Option<Observer>,
}

impl<T> Future for Watch<T> {
    type Output = anyhow::Result<()>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(handle) = this.handle.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let outcome = match Pin::new(handle).poll(cx) {
            Poll::Ready(result) => result.map(drop),
            Poll::Pending => return Poll::Pending,
        };
        this.handle = None;
        if let Some(observer) = this.observer.take() {
            observer.observe(outcome);
        }
        Poll::Ready(Ok(()))
    }
}

impl<T> Drop for Watch<T> {
    fn drop(&mut self) {
        if let (Some(handle), Some(observer)) = (self.handle.take(), self.observer.take()) {
            handle
                .completion()
                .on_finish(Box::new(move |outcome| observer.observe(outcome)));
        }
    }
}

/// Fire-and-forget that keeps faults observable.
pub trait Forget {
    /// Report a fault through the scheduler's default sink.
    fn forget(self) -> Forgotten;

    /// Report a fault through `on_error`.
    fn forget_with<F>(
        self,
        on_error: F,
    ) -> Forgotten
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static;

    /// Report a fault through `sink`, watched with `strategy`.
    fn forget_using(
        self,
        strategy: ForgetStrategy,
        sink: Arc<dyn ReportSink>,
    ) -> Forgotten;
}

impl<T: Send + 'static> Forget for JoinHandle<T> {
    fn forget(self) -> Forgotten {
        let sink = self
            .shared()
            .map(|shared| shared.sink())
            .unwrap_or_else(|| Arc::new(TracingSink));
        self.forget_using(ForgetStrategy::default(), sink)
    }

    fn forget_with<F>(
        self,
        on_error: F,
    ) -> Forgotten
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        self.forget_using(ForgetStrategy::default(), Arc::new(on_error))
    }

    fn forget_using(
        self,
        strategy: ForgetStrategy,
        sink: Arc<dyn ReportSink>,
    ) -> Forgotten {
        let receipt = Forgotten::new();
        let shared = self.shared();
        let observer = Observer {
            sink,
            receipt: receipt.clone(),
            stats: shared.as_ref().map(|s| s.stats().clone()),
        };

        let watcher = match (strategy, shared) {
            (ForgetStrategy::AwaitCatch, Some(shared)) => {
                match ExecutionContext::current_for(shared.id()) {
                    ExecutionContext::Main => Some((shared, Lane::Main, ResumePolicy::MainContext)),
                    _ => Some((shared, Lane::Worker, ResumePolicy::Unspecified)),
                }
            }
            (ForgetStrategy::DetachedAwaitCatch, Some(shared)) => {
                Some((shared, Lane::Worker, ResumePolicy::Unspecified))
            }
            // Continuations need no scheduler; also the fallback once it is gone.
            _ => None,
        };

        match watcher {
            Some((shared, lane, policy)) => {
                let builder = TaskBuilder::new()
                    .name(format!("forget({})", self.name()))
                    .lane(lane)
                    .resume_on(policy);
                let watch = Watch {
                    handle: Some(self),
                    observer: Some(observer),
                };
                shared.spawn(builder, watch).detach();
            }
            None => {
                self.completion()
                    .on_finish(Box::new(move |outcome| observer.observe(outcome)));
            }
        }

        receipt
    }
}
