//! Task scheduler with two lanes
//!
//! The main lane is a single cooperative context: its queue is drained only by
//! [`Scheduler::on_tick`], on the thread that created the scheduler. The
//! worker lane is a pool of background threads. Every task carries a
//! [`ResumePolicy`] that decides where it is polled after each suspension
//! point, independently of where its first poll happened.

pub mod context;
pub mod join;
pub(crate) mod queue;
pub mod task;
pub mod work_stealer;

#[cfg(test)]
mod tests;

pub use context::ExecutionContext;
pub use join::{JoinHandle, TaskError};
pub use task::{Lane, ResumePolicy, TaskBuilder, TaskId, TaskIdGenerator, TaskState};
pub use work_stealer::StealStats;

use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::runtime::forget::{Forget, Forgotten, ReportSink, TracingSink};
use join::Completion;
use queue::MainQueue;
use task::Task;
use work_stealer::WorkStealer;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub num_workers: usize,
    /// How long an idle worker (or `run_until`) parks before rechecking.
    pub idle_timeout: Duration,
    /// Interval between host ticks when the scheduler drives itself.
    pub frame_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus,
            idle_timeout: Duration::from_millis(1),
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// Errors raised while building a scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The configuration cannot be used.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total tasks scheduled.
    pub tasks_scheduled: AtomicUsize,
    /// Tasks that completed with a value.
    pub tasks_completed: AtomicUsize,
    /// Tasks that faulted.
    pub tasks_faulted: AtomicUsize,
    /// Tasks that observed a cancellation.
    pub tasks_cancelled: AtomicUsize,
    /// Tasks dropped by a shutdown before finishing.
    pub tasks_abandoned: AtomicUsize,
    /// Faults nobody was left to observe.
    pub unobserved_faults: AtomicUsize,
    /// Faults delivered to a report sink.
    pub reported_faults: AtomicUsize,
    /// Polls that ran on a different context than the previous poll.
    pub context_switches: AtomicUsize,
    /// Host ticks processed.
    pub ticks: AtomicUsize,
}

impl SchedulerStats {
    /// Record a scheduled task.
    #[inline]
    pub fn record_scheduled(&self) {
        self.tasks_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a finished task by its terminal state.
    #[inline]
    pub fn record_finished(
        &self,
        state: TaskState,
    ) {
        let counter = match state {
            TaskState::Faulted => &self.tasks_faulted,
            TaskState::Cancelled => &self.tasks_cancelled,
            _ => &self.tasks_completed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_abandoned(&self) {
        self.tasks_abandoned.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_unobserved(&self) {
        self.unobserved_faults.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_reported(&self) {
        self.reported_faults.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_context_switch(&self) {
        self.context_switches.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    /// Copy the counters into a plain value.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scheduled: self.tasks_scheduled.load(Ordering::SeqCst),
            completed: self.tasks_completed.load(Ordering::SeqCst),
            faulted: self.tasks_faulted.load(Ordering::SeqCst),
            cancelled: self.tasks_cancelled.load(Ordering::SeqCst),
            abandoned: self.tasks_abandoned.load(Ordering::SeqCst),
            unobserved_faults: self.unobserved_faults.load(Ordering::SeqCst),
            reported_faults: self.reported_faults.load(Ordering::SeqCst),
            context_switches: self.context_switches.load(Ordering::SeqCst),
            ticks: self.ticks.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub scheduled: usize,
    pub completed: usize,
    pub faulted: usize,
    pub cancelled: usize,
    pub abandoned: usize,
    pub unobserved_faults: usize,
    pub reported_faults: usize,
    pub context_switches: usize,
    pub ticks: usize,
}

impl StatsSnapshot {
    /// Tasks scheduled but not finished yet.
    #[inline]
    pub fn live(&self) -> usize {
        self.scheduled
            .saturating_sub(self.completed + self.faulted + self.cancelled + self.abandoned)
    }
}

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by the scheduler, its handles, workers and tasks.
pub(crate) struct Shared {
    id: u64,
    config: SchedulerConfig,
    main_queue: MainQueue,
    workers: WorkStealer,
    stats: Arc<SchedulerStats>,
    sink: Arc<dyn ReportSink>,
    ids: TaskIdGenerator,
    running: AtomicBool,
}

impl Shared {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn stats(&self) -> &Arc<SchedulerStats> {
        &self.stats
    }

    #[inline]
    pub(crate) fn sink(&self) -> Arc<dyn ReportSink> {
        self.sink.clone()
    }

    /// Create a task and queue its first poll on its lane.
    pub(crate) fn spawn<F, T>(
        self: &Arc<Self>,
        builder: TaskBuilder,
        work: F,
    ) -> JoinHandle<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let header = Arc::new(builder.into_header(self.ids.next()));
        let completion = Arc::new(Completion::new(header.clone(), self.stats.clone()));

        let done = completion.clone();
        let future = async move {
            let result = work.await.map_err(TaskError::from_work);
            done.finish(result);
        };
        let aborted = completion.clone();
        let abort = Box::new(move |err: TaskError| aborted.finish(Err(err)));

        let task = Arc::new(Task::new(
            header,
            Box::pin(future),
            abort,
            Arc::downgrade(self),
        ));
        self.stats.record_scheduled();
        debug!(
            "spawned {} ({}) lane={:?} resume={:?}",
            task.header().id(),
            task.header().name(),
            task.header().lane(),
            task.header().policy()
        );

        if self.is_running() && task.mark_queued() {
            match task.header().lane() {
                Lane::Main => self.main_queue.push(task),
                Lane::Worker => self.workers.push_round_robin(task),
            }
        }

        JoinHandle::new(completion, Arc::downgrade(self))
    }

    /// Route a woken task according to its resume policy.
    pub(crate) fn schedule_resume(
        &self,
        task: Arc<Task>,
    ) {
        if !self.is_running() {
            return;
        }
        match task.header().policy() {
            ResumePolicy::MainContext => self.main_queue.push(task),
            ResumePolicy::Unspecified => self.workers.push_random(task),
        }
    }

    fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
    ) {
        let ctx = ExecutionContext::Worker(worker_id);
        let previous = context::enter(self.id, ctx);
        debug!("worker {} started", worker_id);

        while self.is_running() {
            if let Some(task) = self.workers.find_task(worker_id) {
                task.run(ctx, &self.stats);
                continue;
            }
            self.workers.wait_idle(self.config.idle_timeout);
        }

        debug!("worker {} stopped", worker_id);
        context::restore(previous);
    }
}

/// Cloneable, thread-safe access to a scheduler.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// Run `work` on the main context; every resumption comes back there.
    pub fn run_on_main<F, T>(
        &self,
        work: F,
    ) -> JoinHandle<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(TaskBuilder::new(), work)
    }

    /// Run `work` on the worker pool; resumptions land on any worker.
    pub fn run_on_worker<F, T>(
        &self,
        work: F,
    ) -> JoinHandle<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(
            TaskBuilder::new()
                .lane(Lane::Worker)
                .resume_on(ResumePolicy::Unspecified),
            work,
        )
    }

    /// Start `work` on the worker pool and bring every resumption back to main.
    pub fn run_on_worker_then_main<F, T>(
        &self,
        work: F,
    ) -> JoinHandle<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(
            TaskBuilder::new()
                .lane(Lane::Worker)
                .resume_on(ResumePolicy::MainContext),
            work,
        )
    }

    /// Spawn with explicit options.
    pub fn spawn_with<F, T>(
        &self,
        builder: TaskBuilder,
        work: F,
    ) -> JoinHandle<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.spawn(builder, work)
    }

    /// Run `work` on the main context without keeping a handle, reporting
    /// a fault through the scheduler's sink.
    pub fn forget<F, T>(
        &self,
        work: F,
    ) -> Forgotten
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.run_on_main(work).forget()
    }

    /// Context of the calling thread as seen by this scheduler.
    #[inline]
    pub fn current_context(&self) -> ExecutionContext {
        ExecutionContext::current_for(self.shared.id)
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Get work stealing statistics.
    #[inline]
    pub fn steal_stats(&self) -> &StealStats {
        self.shared.workers.stats()
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Get the number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.shared.workers.num_workers()
    }

    /// The sink used by [`Forget::forget`].
    #[inline]
    pub fn default_sink(&self) -> Arc<dyn ReportSink> {
        self.shared.sink()
    }

    /// Check if the scheduler is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.shared.id)
            .field("num_workers", &self.shared.workers.num_workers())
            .field("running", &self.shared.is_running())
            .finish()
    }
}

/// Owner of the main context.
///
/// The thread that creates the scheduler becomes its main context; the type
/// is neither `Send` nor `Sync`, so `on_tick` can only run there. All spawn
/// operations are reachable through [`Deref`] to [`Handle`].
pub struct Scheduler {
    handle: Handle,
    workers: Vec<thread::JoinHandle<()>>,
    previous_context: Option<(u64, ExecutionContext)>,
    _main_thread: PhantomData<*const ()>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    pub fn new() -> Result<Self, SchedulerError> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with custom configuration.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a scheduler whose `forget()` reports through `sink`.
    pub fn with_sink(
        config: SchedulerConfig,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, SchedulerError> {
        if config.num_workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }

        let shared = Arc::new(Shared {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::SeqCst),
            main_queue: MainQueue::new(),
            workers: WorkStealer::new(config.num_workers),
            stats: Arc::new(SchedulerStats::default()),
            sink,
            ids: TaskIdGenerator::new(),
            running: AtomicBool::new(true),
            config,
        });

        let mut scheduler = Self {
            handle: Handle {
                shared: shared.clone(),
            },
            workers: Vec::with_capacity(shared.config.num_workers),
            previous_context: None,
            _main_thread: PhantomData,
        };

        for worker_id in 0..shared.config.num_workers {
            let worker_shared = shared.clone();
            let worker = thread::Builder::new()
                .name(format!("tasklane-worker-{}", worker_id))
                .spawn(move || worker_shared.worker_loop(worker_id))?;
            scheduler.workers.push(worker);
        }

        scheduler.previous_context = context::enter(shared.id, ExecutionContext::Main);
        debug!(
            "scheduler {} started with {} workers",
            shared.id, shared.config.num_workers
        );
        Ok(scheduler)
    }

    /// Get a cloneable handle.
    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Poll every main-lane task queued when the tick starts, in FIFO order.
    ///
    /// Returns the number of polls performed.
    pub fn on_tick(&self) -> usize {
        let shared = &self.handle.shared;
        let batch = shared.main_queue.take_batch();
        let polled = batch.len();
        for task in batch {
            task.run(ExecutionContext::Main, &shared.stats);
        }
        shared.stats.record_tick();
        trace!("tick polled {} tasks", polled);
        polled
    }

    /// Tick until `handle` resolves.
    ///
    /// Waits on the main queue between ticks, so worker-lane tasks and timers
    /// progress while nothing is queued for main. Never returns if the task
    /// never finishes; see [`Scheduler::run_until_timeout`].
    pub fn run_until<T>(
        &self,
        mut handle: JoinHandle<T>,
    ) -> Result<T, TaskError> {
        let idle = self.handle.shared.config.idle_timeout;
        loop {
            if let Some(result) = self.tick_and_take(&mut handle) {
                return result;
            }
            self.handle.shared.main_queue.wait_for_work(idle);
        }
    }

    /// Tick until `handle` resolves or `timeout` elapses.
    ///
    /// Returns `None` on timeout; the handle stays usable.
    pub fn run_until_timeout<T>(
        &self,
        handle: &mut JoinHandle<T>,
        timeout: Duration,
    ) -> Option<Result<T, TaskError>> {
        let deadline = Instant::now() + timeout;
        let idle = self.handle.shared.config.idle_timeout;
        loop {
            if let Some(result) = self.tick_and_take(handle) {
                return Some(result);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            self.handle.shared.main_queue.wait_for_work(idle.min(left));
        }
    }

    fn tick_and_take<T>(
        &self,
        handle: &mut JoinHandle<T>,
    ) -> Option<Result<T, TaskError>> {
        self.on_tick();
        handle.try_result()
    }

    /// Tick until no task is live or `timeout` elapses. Returns true when idle.
    pub fn run_until_idle(
        &self,
        timeout: Duration,
    ) -> bool {
        let shared = &self.handle.shared;
        let deadline = Instant::now() + timeout;
        loop {
            self.on_tick();
            if shared.stats.snapshot().live() == 0 && shared.main_queue.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            shared.main_queue.wait_for_work(shared.config.idle_timeout);
        }
    }

    /// Act as the host loop: tick every `frame_interval` for `duration`.
    pub fn run_frames(
        &self,
        duration: Duration,
    ) {
        let deadline = Instant::now() + duration;
        let frame = self.handle.shared.config.frame_interval;
        while Instant::now() < deadline {
            self.on_tick();
            thread::sleep(frame.min(deadline.saturating_duration_since(Instant::now())));
        }
        self.on_tick();
    }

    /// Stop the workers and drop every queued task.
    ///
    /// Tasks that had not finished resolve to [`TaskError::Abandoned`].
    pub fn shutdown(&mut self) {
        let shared = &self.handle.shared;
        if !shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        shared.workers.notify_all();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }

        let pending = shared.main_queue.drain().len() + shared.workers.drain().len();
        debug!(
            "scheduler {} shut down, dropped {} queued tasks",
            shared.id, pending
        );
    }
}

impl Deref for Scheduler {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
        context::restore(self.previous_context.take());
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("handle", &self.handle)
            .field("main_queued", &self.handle.shared.main_queue.len())
            .field("worker_queued", &self.handle.shared.workers.len())
            .finish()
    }
}
