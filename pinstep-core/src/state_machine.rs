//! A continuation written out by hand the way the compiler lowers an
//! `async` block: one enum variant per suspension point, each holding only
//! what is still needed afterwards.
//!
//! [`FirstWord`] is the lowering of
//!
//! ```ignore
//! async move {
//!     let text = source.await.ok()?;
//!     let borrowed: &String = &text;
//!     gate.await;
//!     first_word(borrowed)
//! }
//! ```
//!
//! `borrowed` is alive across `gate.await`, so the suspended state contains a
//! pointer to one of its own fields. That makes the type `!Unpin`: it has to
//! be pinned before its first step and can never move afterwards.
//!
//! A plain `&mut` cannot be turned into a pin:
//!
//! ```compile_fail
//! use std::pin::Pin;
//! use futures::channel::oneshot;
//! use pinstep_core::{FirstWord, Trigger};
//!
//! let (_tx, rx) = oneshot::channel::<String>();
//! let mut word = FirstWord::new(rx, Trigger::new().wait(1));
//! let _pinned = Pin::new(&mut word);
//! ```
//!
//! and a pinned value cannot be moved out of its pin:
//!
//! ```compile_fail
//! use futures::channel::oneshot;
//! use pinstep_core::{FirstWord, Trigger};
//!
//! let (_tx, rx) = oneshot::channel::<String>();
//! let pinned = Box::pin(FirstWord::new(rx, Trigger::new().wait(1)));
//! let _moved: FirstWord = *pinned;
//! ```
//!
//! Nor can a pinned value be swapped out through its pin, which would move
//! the old value just the same. `Pin` only hands out `&mut` for `Unpin`
//! types:
//!
//! ```compile_fail
//! use std::pin::pin;
//! use futures::channel::oneshot;
//! use pinstep_core::{FirstWord, Trigger};
//!
//! let (_tx, rx) = oneshot::channel::<String>();
//! let (_other_tx, other_rx) = oneshot::channel::<String>();
//! let mut pinned = pin!(FirstWord::new(rx, Trigger::new().wait(1)));
//! let _old = std::mem::replace(&mut *pinned, FirstWord::new(other_rx, Trigger::new().wait(1)));
//! ```

use std::marker::PhantomPinned;
use std::mem;
use std::pin::Pin;
use std::ptr::NonNull;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::trigger::Wait;

enum Phase {
    /// Suspended on `source`.
    Receiving {
        source: oneshot::Receiver<String>,
        gate: Wait,
    },
    /// Suspended on `gate`, with `borrowed` pointing at `text`.
    Holding {
        text: String,
        borrowed: NonNull<String>,
        gate: Wait,
        _pinned: PhantomPinned,
    },
    Done,
}

/// Receives a text, waits for `gate`, then yields the first
/// whitespace-separated word of the text. Yields `None` if the sender was
/// dropped or the text has no words.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct FirstWord {
    phase: Phase,
}

impl FirstWord {
    pub fn new(source: oneshot::Receiver<String>, gate: Wait) -> Self {
        FirstWord {
            phase: Phase::Receiving { source, gate },
        }
    }
}

fn first_word(text: &str) -> Option<String> {
    text.split_whitespace().next().map(str::to_owned)
}

impl Future for FirstWord {
    type Output = Option<String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: the value is never moved out of `this`. `phase` is only
        // replaced in place, and the pointer stored in `Holding` is taken
        // after that variant has been written to its final location.
        let this = unsafe { self.get_unchecked_mut() };

        loop {
            match &mut this.phase {
                Phase::Receiving { source, .. } => {
                    let text = match Pin::new(source).poll(cx) {
                        Poll::Ready(Ok(text)) => text,
                        Poll::Ready(Err(oneshot::Canceled)) => {
                            this.phase = Phase::Done;
                            return Poll::Ready(None);
                        }
                        Poll::Pending => return Poll::Pending,
                    };

                    let Phase::Receiving { gate, .. } = mem::replace(&mut this.phase, Phase::Done)
                    else {
                        unreachable!("phase changed while receiving");
                    };

                    this.phase = Phase::Holding {
                        text,
                        borrowed: NonNull::dangling(),
                        gate,
                        _pinned: PhantomPinned,
                    };
                    if let Phase::Holding { text, borrowed, .. } = &mut this.phase {
                        *borrowed = NonNull::from(&*text);
                    }
                    tracing::trace!("first_word: text received, waiting on gate");
                }
                Phase::Holding { borrowed, gate, .. } => {
                    if Pin::new(gate).poll(cx).is_pending() {
                        return Poll::Pending;
                    }

                    // SAFETY: `borrowed` points at the `text` field of this
                    // same pinned value, which has not moved since.
                    let word = first_word(unsafe { borrowed.as_ref() });
                    this.phase = Phase::Done;
                    return Poll::Ready(word);
                }
                Phase::Done => panic!("`FirstWord` polled after completion"),
            }
        }
    }
}
