//! Timed delays.
//!
//! A single background thread keeps the pending deadlines and fires wakers
//! when they expire. It never polls a task: where the woken task continues is
//! decided by the task's resume policy, not by the timer.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{error, trace};

use crate::runtime::cancel::{CancellationToken, Cancelled};

static TIMER: Lazy<TimerService> = Lazy::new(TimerService::start);

#[derive(Debug, Default)]
struct TimerEntry {
    fired: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl TimerEntry {
    fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }
}

struct Registration {
    deadline: Instant,
    seq: u64,
    entry: Arc<TimerEntry>,
}

impl PartialEq for Registration {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Registration {}

impl PartialOrd for Registration {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Registration {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(
        &self,
        other: &Self,
    ) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerService {
    /// `None` if the timer thread could not be started.
    tx: Option<Sender<Registration>>,
    seq: Mutex<u64>,
}

impl TimerService {
    fn start() -> Self {
        let (tx, rx) = channel::unbounded();
        let spawned = thread::Builder::new()
            .name("tasklane-timer".to_string())
            .spawn(move || timer_loop(rx));
        match spawned {
            Ok(_) => Self {
                tx: Some(tx),
                seq: Mutex::new(0),
            },
            Err(e) => {
                error!("failed to start timer thread, delays will spin: {}", e);
                Self {
                    tx: None,
                    seq: Mutex::new(0),
                }
            }
        }
    }

    /// Returns false if the timer is unavailable.
    fn register(
        &self,
        deadline: Instant,
        entry: Arc<TimerEntry>,
    ) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let seq = {
            let mut seq = self.seq.lock();
            *seq += 1;
            *seq
        };
        tx.send(Registration {
            deadline,
            seq,
            entry,
        })
        .is_ok()
    }
}

fn timer_loop(rx: Receiver<Registration>) {
    let mut pending: BinaryHeap<Registration> = BinaryHeap::new();
    loop {
        let now = Instant::now();
        while pending.peek().is_some_and(|r| r.deadline <= now) {
            if let Some(due) = pending.pop() {
                trace!("timer {} fired", due.seq);
                due.entry.fire();
            }
        }

        let received = match pending.peek() {
            Some(next) => rx.recv_timeout(next.deadline.saturating_duration_since(now)),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(registration) => pending.push(registration),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Future returned by [`delay`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Delay {
    deadline: Instant,
    entry: Option<Arc<TimerEntry>>,
}

impl Delay {
    /// A delay that ends at `deadline`.
    #[inline]
    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline,
            entry: None,
        }
    }

    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        let this = self.get_mut();
        if Instant::now() >= this.deadline {
            return Poll::Ready(());
        }

        if let Some(entry) = &this.entry {
            if entry.fired.load(Ordering::SeqCst) {
                return Poll::Ready(());
            }
            let mut waker = entry.waker.lock();
            match waker.as_ref() {
                Some(w) if w.will_wake(cx.waker()) => {}
                _ => *waker = Some(cx.waker().clone()),
            }
            return Poll::Pending;
        }

        let entry = Arc::new(TimerEntry {
            fired: AtomicBool::new(false),
            waker: Mutex::new(Some(cx.waker().clone())),
        });
        if TIMER.register(this.deadline, entry.clone()) {
            this.entry = Some(entry);
        } else {
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        // The heap entry lives until its deadline; don't keep the task alive with it.
        if let Some(entry) = &self.entry {
            entry.waker.lock().take();
        }
    }
}

/// Suspend the current task for at least `duration`.
#[inline]
pub fn delay(duration: Duration) -> Delay {
    Delay::until(Instant::now() + duration)
}

/// [`delay`] that fails with [`Cancelled`] as soon as `token` is cancelled.
pub async fn delay_cancellable(
    duration: Duration,
    token: &CancellationToken,
) -> Result<(), Cancelled> {
    token.run(delay(duration)).await
}
