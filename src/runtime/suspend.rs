//! Suspension points other than timed delays.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::runtime::cancel::{CancellationToken, Cancelled};

/// Wakers parked on some condition.
///
/// Each waiting future owns one registration key and removes it when it is
/// dropped, so a finished task is never kept alive by the set.
#[derive(Debug, Default)]
pub(crate) struct WakerSet {
    wakers: Mutex<HashMap<u64, Waker>>,
    next_key: AtomicU64,
}

impl WakerSet {
    /// Register or refresh the waker stored under `key`.
    pub(crate) fn register(
        &self,
        key: &mut Option<u64>,
        waker: &Waker,
    ) {
        let id = *key.get_or_insert_with(|| self.next_key.fetch_add(1, Ordering::Relaxed));
        let mut wakers = self.wakers.lock();
        match wakers.get(&id) {
            Some(w) if w.will_wake(waker) => {}
            _ => {
                wakers.insert(id, waker.clone());
            }
        }
    }

    /// Drop the registration under `key`, if any.
    pub(crate) fn remove(
        &self,
        key: &mut Option<u64>,
    ) {
        if let Some(id) = key.take() {
            self.wakers.lock().remove(&id);
        }
    }

    /// Number of parked wakers.
    pub(crate) fn len(&self) -> usize {
        self.wakers.lock().len()
    }

    pub(crate) fn wake_all(&self) {
        let wakers = std::mem::take(&mut *self.wakers.lock());
        for waker in wakers.into_values() {
            waker.wake();
        }
    }
}

/// Yield once. On the main lane this means "continue on the next tick".
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct NextTick {
    yielded: bool,
}

impl Future for NextTick {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Suspend until the next scheduling round.
#[inline]
pub fn next_tick() -> NextTick {
    NextTick::default()
}

/// [`next_tick`] that fails with [`Cancelled`] if `token` is cancelled first.
pub async fn next_tick_cancellable(token: &CancellationToken) -> Result<(), Cancelled> {
    token.run(next_tick()).await
}

#[derive(Debug, Default)]
struct SignalInner {
    set: AtomicBool,
    waiters: WakerSet,
}

/// A latch set by some external party that tasks can wait on.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl Signal {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake every waiter. Later waits complete at once.
    pub fn set(&self) {
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.waiters.wake_all();
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Number of suspended waits currently parked on this signal.
    #[inline]
    pub fn waiters(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Suspend until the signal is set.
    pub fn wait(&self) -> SignalWait {
        SignalWait {
            signal: self.clone(),
            key: None,
        }
    }

    /// [`Signal::wait`] that fails with [`Cancelled`] if `token` is cancelled first.
    pub async fn wait_cancellable(
        &self,
        token: &CancellationToken,
    ) -> Result<(), Cancelled> {
        token.run(self.wait()).await
    }
}

/// Future returned by [`Signal::wait`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct SignalWait {
    signal: Signal,
    key: Option<u64>,
}

impl Future for SignalWait {
    type Output = ();

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        let this = self.get_mut();
        if this.signal.is_set() {
            return Poll::Ready(());
        }
        this.signal.inner.waiters.register(&mut this.key, cx.waker());
        // set() may have run between the check and the registration.
        if this.signal.is_set() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

impl Drop for SignalWait {
    fn drop(&mut self) {
        self.signal.inner.waiters.remove(&mut self.key);
    }
}
