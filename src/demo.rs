//! Walkthrough scenarios used by the `tasklane` binary.
//!
//! Each scenario logs what happens and also returns it, so the same runs can
//! be asserted on.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::runtime::cancel::CancellationSource;
use crate::runtime::forget::{Forget, ForgetState, ForgetStrategy, ReportSink};
use crate::runtime::scheduler::{ExecutionContext, JoinHandle, Scheduler, TaskError, TaskState};
use crate::runtime::timer::{delay, delay_cancellable};

/// Where a line of task code ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSample {
    pub context: ExecutionContext,
    pub thread: ThreadId,
}

impl ContextSample {
    /// Sample the calling thread.
    pub fn here() -> Self {
        Self {
            context: ExecutionContext::current(),
            thread: thread::current().id(),
        }
    }
}

/// Contexts seen by one task before and after each of its delays.
#[derive(Debug, Clone)]
pub struct AffinityTrace {
    pub label: &'static str,
    pub samples: Vec<ContextSample>,
}

impl AffinityTrace {
    /// Check if every sample ran on the same thread.
    pub fn stayed_on_one_thread(&self) -> bool {
        self.samples.windows(2).all(|w| w[0].thread == w[1].thread)
    }
}

async fn trace_delays(
    label: &'static str,
    awaits: usize,
    step: Duration,
) -> anyhow::Result<AffinityTrace> {
    let mut samples = vec![ContextSample::here()];
    info!("{}: before await: {}", label, samples[0].context);
    for n in 1..=awaits {
        delay(step).await;
        let sample = ContextSample::here();
        info!("{}: after await {}: {}", label, n, sample.context);
        samples.push(sample);
    }
    Ok(AffinityTrace { label, samples })
}

/// Run the same "log, delay, log, delay, log" body on each kind of task.
pub fn affinity(
    scheduler: &Scheduler,
    awaits: usize,
    step: Duration,
) -> Result<Vec<AffinityTrace>, TaskError> {
    let worker = scheduler.run_on_worker(trace_delays("worker", awaits, step));
    let back_to_main =
        scheduler.run_on_worker_then_main(trace_delays("worker-then-main", awaits, step));
    let main = scheduler.run_on_main(trace_delays("main", awaits, step));

    Ok(vec![
        scheduler.run_until(worker)?,
        scheduler.run_until(back_to_main)?,
        scheduler.run_until(main)?,
    ])
}

/// One fire-and-forget run and what reached its sink.
#[derive(Debug, Clone)]
pub struct ForgetRun {
    pub label: String,
    pub state: ForgetState,
    pub reports: Vec<(String, ExecutionContext)>,
}

/// Outcome of [`forget`].
#[derive(Debug, Clone)]
pub struct ForgetSummary {
    pub runs: Vec<ForgetRun>,
    /// Faults dropped with nobody observing them during the scenario.
    pub unobserved: usize,
}

async fn failing_work(label: &'static str) -> anyhow::Result<()> {
    info!("{}: start", label);
    anyhow::bail!("Exception on {}", label)
}

#[derive(Default)]
struct Recorder {
    reports: Mutex<Vec<(String, ExecutionContext)>>,
}

impl ReportSink for Recorder {
    fn report(
        &self,
        error: &anyhow::Error,
    ) {
        info!("reported on {}: {}", ExecutionContext::current(), error);
        self.reports
            .lock()
            .push((error.to_string(), ExecutionContext::current()));
    }
}

/// Fault a task with each forget strategy, then once with a bare dropped handle.
pub fn forget(scheduler: &Scheduler) -> ForgetSummary {
    let unobserved_before = scheduler.stats().unobserved_faults;
    let strategies = [
        ("await-catch", ForgetStrategy::AwaitCatch),
        ("on-fault-continuation", ForgetStrategy::OnFaultContinuation),
        ("detached-await-catch", ForgetStrategy::DetachedAwaitCatch),
    ];

    let mut pending = Vec::new();
    for (label, strategy) in strategies {
        let recorder = Arc::new(Recorder::default());
        let receipt = scheduler
            .run_on_main(failing_work(label))
            .forget_using(strategy, recorder.clone());
        pending.push((label, receipt, recorder));
    }

    // Nobody awaits it and nobody forgets it: the fault disappears.
    scheduler.run_on_main(failing_work("dropped-handle")).detach();

    scheduler.run_until_idle(Duration::from_secs(5));

    let runs = pending
        .into_iter()
        .map(|(label, receipt, recorder)| ForgetRun {
            label: label.to_string(),
            state: receipt.state(),
            reports: recorder.reports.lock().clone(),
        })
        .collect();
    let unobserved = scheduler.stats().unobserved_faults - unobserved_before;
    info!("dropped-handle: {} unobserved fault(s), nothing reported", unobserved);

    ForgetSummary { runs, unobserved }
}

/// How long a scenario waits for one of its tasks before giving up on it.
const OBSERVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Final states of the cancellation scenarios.
#[derive(Debug, Clone, Copy)]
pub struct CancelSummary {
    /// Token cancelled before the task ever suspended.
    pub pre_cancelled: TaskState,
    /// Owner dropped while the task was in a long delay.
    pub owner_dropped: TaskState,
}

/// Cancel one task before it starts and one while it waits.
pub fn cancellation(scheduler: &Scheduler) -> CancelSummary {
    let source = CancellationSource::new();
    let token = source.token();
    source.cancel();
    let pre = scheduler.run_on_main(async move {
        delay_cancellable(Duration::from_secs(60), &token).await?;
        Ok::<(), anyhow::Error>(())
    });

    let owner = CancellationSource::new().cancel_on_drop();
    let token = owner.token();
    let long = scheduler.run_on_main(async move {
        delay_cancellable(Duration::from_secs(60), &token).await?;
        Ok::<(), anyhow::Error>(())
    });
    scheduler.on_tick();
    drop(owner);

    let pre_state = observe_state(scheduler, pre);
    let long_state = observe_state(scheduler, long);
    info!("pre-cancelled: {:?}, owner dropped: {:?}", pre_state, long_state);

    CancelSummary {
        pre_cancelled: pre_state,
        owner_dropped: long_state,
    }
}

fn observe_state(
    scheduler: &Scheduler,
    mut handle: JoinHandle<()>,
) -> TaskState {
    match scheduler.run_until_timeout(&mut handle, OBSERVE_TIMEOUT) {
        Some(Ok(())) => TaskState::Completed,
        Some(Err(TaskError::Faulted(e))) => {
            info!("{} faulted: {:#}", handle.id(), e);
            TaskState::Faulted
        }
        Some(Err(_)) => TaskState::Cancelled,
        None => {
            warn!("{} still {:?} after {:?}", handle.id(), handle.state(), OBSERVE_TIMEOUT);
            handle.state()
        }
    }
}
