use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::Either;
use pin_project::pin_project;

/// Future returned by [`race`].
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Race<A, B> {
    #[pin]
    a: A,
    #[pin]
    b: B,
    done: bool,
}

/// Resolves with the output of whichever future finishes first; the other
/// one is dropped together with the `Race`.
///
/// `a` is stepped before `b` on every step, so when both are ready in the
/// same step `a` wins.
pub fn race<A: Future, B: Future>(a: A, b: B) -> Race<A, B> {
    Race { a, b, done: false }
}

impl<A: Future, B: Future> Future for Race<A, B> {
    type Output = Either<A::Output, B::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        assert!(!*this.done, "`Race` polled after completion");

        if let Poll::Ready(output) = this.a.poll(cx) {
            *this.done = true;
            return Poll::Ready(Either::Left(output));
        }

        if let Poll::Ready(output) = this.b.poll(cx) {
            *this.done = true;
            return Poll::Ready(Either::Right(output));
        }

        Poll::Pending
    }
}
