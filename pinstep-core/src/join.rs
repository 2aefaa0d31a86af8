use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;

enum Slot<F: Future> {
    Pending(Pin<Box<F>>),
    Done(F::Output),
}

/// Future returned by [`join_all`].
///
/// Each child lives in its own heap slot, so the children stay pinned while
/// `JoinAll` itself can be moved freely. Children that finished are never
/// stepped again; their outputs wait in their slot until every child is done.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct JoinAll<F: Future> {
    slots: Vec<Slot<F>>,
    pending: usize,
    finished: bool,
}

// Outputs are never pinned and every child is boxed.
impl<F: Future> Unpin for JoinAll<F> {}

/// Waits for every future in `futures` and returns their outputs in input
/// order, regardless of the order in which they complete.
///
/// Children with different concrete types can be mixed by boxing them, e.g.
/// with [`FutureExt::boxed_local`](futures::FutureExt::boxed_local).
pub fn join_all<I>(futures: I) -> JoinAll<I::Item>
where
    I: IntoIterator,
    I::Item: Future,
{
    let slots: Vec<_> = futures
        .into_iter()
        .map(|future| Slot::Pending(Box::pin(future)))
        .collect();

    JoinAll {
        pending: slots.len(),
        slots,
        finished: false,
    }
}

impl<F: Future> JoinAll<F> {
    /// Number of children that have not completed yet.
    pub fn pending(&self) -> usize {
        self.pending
    }
}

impl<F: Future> Future for JoinAll<F> {
    type Output = Vec<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        assert!(!this.finished, "`JoinAll` polled after completion");

        for slot in this.slots.iter_mut() {
            if let Slot::Pending(future) = slot {
                if let Poll::Ready(output) = future.as_mut().poll(cx) {
                    *slot = Slot::Done(output);
                    this.pending -= 1;
                }
            }
        }

        if this.pending > 0 {
            return Poll::Pending;
        }

        this.finished = true;
        let outputs: Vec<_> = mem::take(&mut this.slots)
            .into_iter()
            .map(|slot| match slot {
                Slot::Done(output) => output,
                Slot::Pending(_) => unreachable!("pending count reached zero with a pending child"),
            })
            .collect();

        tracing::trace!(children = outputs.len(), "join_all complete");
        Poll::Ready(outputs)
    }
}

#[pin_project(project = MaybeDoneProj, project_replace = MaybeDoneOwn)]
enum MaybeDone<F: Future> {
    Pending(#[pin] F),
    Done(F::Output),
    Taken,
}

impl<F: Future> MaybeDone<F> {
    /// Steps the future unless it already finished. Returns `true` once the
    /// output is stored.
    fn poll_done(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> bool {
        let output = match self.as_mut().project() {
            MaybeDoneProj::Pending(future) => match future.poll(cx) {
                Poll::Ready(output) => output,
                Poll::Pending => return false,
            },
            MaybeDoneProj::Done(_) => return true,
            MaybeDoneProj::Taken => panic!("`Join` polled after completion"),
        };

        self.set(MaybeDone::Done(output));
        true
    }

    fn take_output(self: Pin<&mut Self>) -> Option<F::Output> {
        match self.project_replace(MaybeDone::Taken) {
            MaybeDoneOwn::Done(output) => Some(output),
            _ => None,
        }
    }
}

/// Future returned by [`join`].
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Join<A: Future, B: Future> {
    #[pin]
    a: MaybeDone<A>,
    #[pin]
    b: MaybeDone<B>,
}

/// Waits for two futures of different types, without boxing either.
pub fn join<A: Future, B: Future>(a: A, b: B) -> Join<A, B> {
    Join {
        a: MaybeDone::Pending(a),
        b: MaybeDone::Pending(b),
    }
}

impl<A: Future, B: Future> Future for Join<A, B> {
    type Output = (A::Output, B::Output);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        let a_done = this.a.as_mut().poll_done(cx);
        let b_done = this.b.as_mut().poll_done(cx);
        if !(a_done && b_done) {
            return Poll::Pending;
        }

        match (this.a.take_output(), this.b.take_output()) {
            (Some(a), Some(b)) => Poll::Ready((a, b)),
            _ => unreachable!("both halves reported done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use futures::future::LocalBoxFuture;
    use futures::task::{ArcWake, noop_waker, waker};
    use static_assertions::assert_impl_all;

    use crate::executor::{Executor, run};
    use crate::future::guarded;
    use crate::trigger::Trigger;

    assert_impl_all!(JoinAll<LocalBoxFuture<'static, u8>>: Unpin);

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl ArcWake for CountingWaker {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fast_and_slow_children() {
        let trigger = Trigger::new();
        let slow_wait = trigger.wait(3);
        let children: Vec<LocalBoxFuture<'_, &str>> = vec![
            guarded(async { "a" }).boxed_local(),
            guarded(async move {
                slow_wait.await;
                "b"
            })
            .boxed_local(),
        ];

        let mut all = join_all(children);
        let counter = Arc::new(CountingWaker::default());
        let task_waker = waker(counter.clone());
        let mut cx = Context::from_waker(&task_waker);

        assert!(Pin::new(&mut all).poll(&mut cx).is_pending());
        assert_eq!(all.pending(), 1);

        trigger.fire();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(Pin::new(&mut all).poll(&mut cx).is_pending());

        trigger.fire();
        trigger.fire();
        assert_eq!(Pin::new(&mut all).poll(&mut cx), Poll::Ready(vec!["a", "b"]));
    }

    #[test]
    fn test_output_order_ignores_completion_order() {
        let triggers: Vec<Trigger> = (0..4).map(|_| Trigger::new()).collect();
        let executor = Executor::new().unwrap();

        let children: Vec<_> = triggers
            .iter()
            .enumerate()
            .map(|(i, trigger)| {
                let wait = trigger.wait(1);
                guarded(async move {
                    wait.await;
                    i
                })
            })
            .collect();
        let mut handle = executor.spawn(join_all(children));
        executor.tick().unwrap();

        // Complete the children back to front.
        for trigger in triggers.iter().rev() {
            trigger.fire();
            executor.tick().unwrap();
        }

        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);
        assert_eq!(
            Pin::new(&mut handle).poll(&mut cx),
            Poll::Ready(Ok(vec![0, 1, 2, 3]))
        );
    }

    #[test]
    fn test_heterogeneous_children_through_executor() {
        let trigger = Trigger::new();
        let remote = trigger.clone();

        let outputs = run(async move {
            let firing = crate::executor::spawn(async move {
                crate::future::yield_now().await;
                remote.fire();
            });

            let children: Vec<LocalBoxFuture<'_, u32>> = vec![
                std::future::ready(1).boxed_local(),
                async {
                    trigger.wait(1).await;
                    2
                }
                .boxed_local(),
                async { crate::executor::spawn(async { 3 }).await.unwrap() }.boxed_local(),
            ];

            let outputs = join_all(children).await;
            firing.await.unwrap();
            outputs
        });

        assert_eq!(outputs, [1, 2, 3]);
    }

    #[test]
    fn test_empty_join_all_is_ready() {
        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);
        let mut all = join_all(Vec::<std::future::Ready<()>>::new());

        assert_eq!(Pin::new(&mut all).poll(&mut cx), Poll::Ready(vec![]));
    }

    #[test]
    #[should_panic(expected = "polled after completion")]
    fn test_join_all_polled_after_completion_panics() {
        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);
        let mut all = join_all([std::future::ready(1)]);

        let _ = Pin::new(&mut all).poll(&mut cx);
        let _ = Pin::new(&mut all).poll(&mut cx);
    }

    #[test]
    fn test_join_two_types() {
        let trigger = Trigger::new();
        let wait = trigger.wait(1);
        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);

        let mut both = Box::pin(join(
            guarded(async { 7u8 }),
            guarded(async move {
                wait.await;
                "seven"
            }),
        ));

        assert!(both.as_mut().poll(&mut cx).is_pending());
        trigger.fire();
        assert_eq!(both.as_mut().poll(&mut cx), Poll::Ready((7, "seven")));
    }
}
