//! tasklane
//!
//! A small task runtime with two lanes and explicit resume rules.
//!
//! - the **main lane** is one cooperative context driven by a host tick
//!   ([`Scheduler::on_tick`]); a task pinned to it always comes back to it
//!   after a suspension point;
//! - the **worker lane** is a thread pool; a task there resumes on whichever
//!   worker picks it up.
//!
//! Fire-and-forget tasks go through [`Forget`], which guarantees a fault is
//! reported exactly once instead of vanishing with the dropped handle.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tasklane::{delay, ExecutionContext, Forget, Scheduler};
//!
//! fn main() -> anyhow::Result<()> {
//!     let scheduler = Scheduler::new()?;
//!
//!     let handle = scheduler.run_on_worker_then_main(async {
//!         assert!(ExecutionContext::current().is_worker());
//!         delay(Duration::from_millis(10)).await;
//!         assert!(ExecutionContext::current().is_main());
//!         Ok(42)
//!     });
//!     assert_eq!(scheduler.run_until(handle)?, 42);
//!
//!     scheduler
//!         .run_on_main(async { Err::<(), _>(anyhow::anyhow!("boom")) })
//!         .forget_with(|e| eprintln!("observed: {e}"));
//!     scheduler.run_until_idle(Duration::from_secs(1));
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod demo;
pub mod runtime;
pub mod util;

pub use runtime::cancel::{CancelOnDrop, CancellationSource, CancellationToken, Cancelled};
pub use runtime::forget::{Forget, ForgetState, ForgetStrategy, Forgotten, ReportSink, TracingSink};
pub use runtime::scheduler::{
    ExecutionContext, Handle, JoinHandle, Lane, ResumePolicy, Scheduler, SchedulerConfig,
    SchedulerError, StatsSnapshot, TaskBuilder, TaskError, TaskId, TaskState,
};
pub use runtime::suspend::{next_tick, next_tick_cancellable, Signal};
pub use runtime::timer::{delay, delay_cancellable};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "tasklane";
