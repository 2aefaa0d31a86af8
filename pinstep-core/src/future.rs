use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;

/// A one-shot guard around a future.
///
/// Counts how many times the inner future was stepped and panics if it is
/// stepped again after it produced its output, instead of forwarding that
/// call to a future that may not tolerate it.
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Guarded<F> {
    #[pin]
    future: F,
    steps: usize,
    done: bool,
}

pub fn guarded<F: Future>(future: F) -> Guarded<F> {
    Guarded {
        future,
        steps: 0,
        done: false,
    }
}

impl<F> Guarded<F> {
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<F: Future> Future for Guarded<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.project();
        assert!(!*this.done, "`Guarded` future polled after completion");

        *this.steps += 1;
        match this.future.poll(cx) {
            Poll::Ready(output) => {
                *this.done = true;
                Poll::Ready(output)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Future returned by [`yield_now`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }

        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Gives every other ready task a chance to run before the caller
/// continues. Suspends exactly once.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::task::{ArcWake, noop_waker, waker};

    use crate::trigger::Trigger;

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl ArcWake for CountingWaker {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_continuation_waits_for_manual_trigger() {
        let trigger = Trigger::new();
        let wait = trigger.wait(1);
        let mut future = Box::pin(guarded(async move {
            wait.await;
            42
        }));
        let counter = Arc::new(CountingWaker::default());
        let task_waker = waker(counter.clone());
        let mut cx = Context::from_waker(&task_waker);

        assert_eq!(future.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        trigger.fire();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Ready(42));
        assert_eq!(future.steps(), 3);
        assert!(future.is_done());
    }

    #[test]
    #[should_panic(expected = "polled after completion")]
    fn test_guard_flags_step_after_done() {
        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);
        let mut future = Box::pin(guarded(async { 1 }));

        assert_eq!(future.as_mut().poll(&mut cx), Poll::Ready(1));
        let _ = future.as_mut().poll(&mut cx);
    }

    #[test]
    fn test_yield_now_wakes_itself_once() {
        let counter = Arc::new(CountingWaker::default());
        let task_waker = waker(counter.clone());
        let mut cx = Context::from_waker(&task_waker);
        let mut future = yield_now();

        assert!(Pin::new(&mut future).poll(&mut cx).is_pending());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(Pin::new(&mut future).poll(&mut cx).is_ready());
    }
}
