//! Cooperative cancellation.
//!
//! A [`CancellationSource`] is owned by whoever decides when work should stop
//! (for example the lifetime of some host object, see [`CancelOnDrop`]).
//! Tasks only see [`CancellationToken`]s and check them at suspension points.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::debug;

use crate::runtime::suspend::WakerSet;

/// Returned by a suspension point that observed a cancellation.
///
/// Propagate it with `?`; a task that ends with this error finishes in the
/// `Cancelled` state instead of `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    waiters: WakerSet,
}

/// The cancelling side.
#[derive(Debug, Default)]
pub struct CancellationSource {
    inner: Arc<CancelInner>,
}

impl CancellationSource {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token observing this source.
    #[inline]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Some(self.inner.clone()),
        }
    }

    /// Cancel every token. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            debug!("cancellation requested");
            self.inner.waiters.wake_all();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Number of suspended waits currently parked on this source.
    #[inline]
    pub fn waiters(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Turn this source into a guard that cancels when dropped.
    #[inline]
    pub fn cancel_on_drop(self) -> CancelOnDrop {
        CancelOnDrop { source: self }
    }
}

/// Cancels its source when dropped; ties cancellation to an owner's lifetime.
#[derive(Debug)]
pub struct CancelOnDrop {
    source: CancellationSource,
}

impl CancelOnDrop {
    #[inline]
    pub fn token(&self) -> CancellationToken {
        self.source.token()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.source.cancel();
    }
}

/// The observing side. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Option<Arc<CancelInner>>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    #[inline]
    pub fn none() -> Self {
        Self { inner: None }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.cancelled.load(Ordering::SeqCst))
    }

    /// `Err(Cancelled)` if cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Suspend until cancellation is requested.
    pub fn cancelled(&self) -> WaitForCancellation {
        WaitForCancellation {
            token: self.clone(),
            key: None,
        }
    }

    /// Run `future` until it finishes or this token is cancelled.
    ///
    /// The token is checked before the first poll, so a pre-cancelled token
    /// never lets the future start.
    pub fn run<F: Future>(
        &self,
        future: F,
    ) -> WithCancellation<F> {
        WithCancellation {
            token: self.clone(),
            future: Box::pin(future),
            key: None,
        }
    }

    fn register(
        &self,
        key: &mut Option<u64>,
        cx: &Context<'_>,
    ) {
        if let Some(inner) = &self.inner {
            inner.waiters.register(key, cx.waker());
        }
    }

    fn deregister(
        &self,
        key: &mut Option<u64>,
    ) {
        if let Some(inner) = &self.inner {
            inner.waiters.remove(key);
        }
    }
}

/// Future returned by [`CancellationToken::cancelled`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct WaitForCancellation {
    token: CancellationToken,
    key: Option<u64>,
}

impl Future for WaitForCancellation {
    type Output = ();

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(());
        }
        this.token.register(&mut this.key, cx);
        if this.token.is_cancelled() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

impl Drop for WaitForCancellation {
    fn drop(&mut self) {
        self.token.deregister(&mut self.key);
    }
}

/// Future returned by [`CancellationToken::run`].
#[must_use = "futures do nothing unless awaited"]
pub struct WithCancellation<F> {
    token: CancellationToken,
    future: Pin<Box<F>>,
    key: Option<u64>,
}

impl<F: Future> Future for WithCancellation<F> {
    type Output = Result<F::Output, Cancelled>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(Cancelled));
        }
        if let Poll::Ready(output) = this.future.as_mut().poll(cx) {
            this.token.deregister(&mut this.key);
            return Poll::Ready(Ok(output));
        }
        this.token.register(&mut this.key, cx);
        if this.token.is_cancelled() {
            return Poll::Ready(Err(Cancelled));
        }
        Poll::Pending
    }
}

impl<F> Drop for WithCancellation<F> {
    fn drop(&mut self) {
        self.token.deregister(&mut self.key);
    }
}
