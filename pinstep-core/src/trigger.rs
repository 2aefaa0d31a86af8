use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::task::AtomicWaker;

/// A manually fired event source.
///
/// Clones share the same counter, so one clone can be handed to another
/// thread (or another task) and fired there while a future produced by
/// [`wait`](Trigger::wait) is suspended on it. Only one waiter is tracked
/// at a time; registering a new waker replaces the previous one.
#[derive(Clone, Default)]
pub struct Trigger {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    fired: AtomicUsize,
    waker: AtomicWaker,
}

impl Trigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        let fired = self.inner.fired.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(fired, "trigger fired");
        self.inner.waker.wake();
    }

    /// How many times the trigger has fired so far.
    pub fn fired(&self) -> usize {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolves once the trigger has fired at least `count` times in total.
    pub fn wait(&self, count: usize) -> Wait {
        Wait {
            inner: self.inner.clone(),
            count,
        }
    }
}

#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Wait {
    inner: Arc<Inner>,
    count: usize,
}

impl Wait {
    fn reached(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire) >= self.count
    }
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.reached() {
            return Poll::Ready(());
        }

        self.inner.waker.register(cx.waker());

        // Re-check after registering; a fire in between would be missed otherwise.
        if self.reached() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
