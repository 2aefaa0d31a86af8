use std::collections::HashMap;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd};
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use polling::{AsRawSource, AsSource, Event, Events, Poller};

use crate::builder::DEFAULT_EVENT_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    ReadableWritable,
}

/// Readiness event source and idle parking spot for an executor.
///
/// Leaf futures hand their [`Waker`] to the reactor together with an OS
/// source; [`wait_and_wake`](Reactor::wait_and_wake) blocks until one of the
/// sources becomes ready (or until [`notify`](Reactor::notify) is called from
/// any thread) and wakes the matching tasks. Registrations are one-shot: a
/// waker is removed from the map once it has been woken.
///
/// Sources can only be registered through the [`Readiness`] futures, which
/// deregister before they give up the source. Raw registration is not part
/// of the public API:
///
/// ```compile_fail
/// use std::os::unix::net::UnixStream;
/// use futures::task::noop_waker;
/// use pinstep_core::{Interest, Reactor};
///
/// let reactor = Reactor::new().unwrap();
/// let (a, _b) = UnixStream::pair().unwrap();
/// reactor.register(&a, Interest::Readable, noop_waker()).unwrap();
/// ```
pub struct Reactor {
    poller: Poller,
    event_map: Mutex<HashMap<usize, Waker>>,
    next_key: AtomicUsize,
    events: Mutex<Events>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> io::Result<Self> {
        Ok(Reactor {
            poller: Poller::new()?,
            event_map: Mutex::new(HashMap::new()),
            next_key: AtomicUsize::new(1),
            events: Mutex::new(Events::with_capacity(capacity)),
        })
    }

    /// Registers `fd` for one readiness event, handing `waker` out when it
    /// fires. Leaf futures go through [`readable`](Reactor::readable) and
    /// [`writable`](Reactor::writable), which own the source for the whole
    /// registration.
    pub(crate) fn register(
        &self,
        fd: impl AsRawSource,
        interest: Interest,
        waker: Waker,
    ) -> Result<usize, io::Error> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);

        let event = match interest {
            Interest::Readable => Event::readable(key),
            Interest::Writable => Event::writable(key),
            Interest::ReadableWritable => Event::all(key),
        };

        // Insert first so an event that fires before `add` returns still finds its waker.
        self.event_map.lock().unwrap().insert(key, waker);

        // SAFETY: the only caller is `Readiness`, which owns or borrows the source for
        // its whole lifetime and deletes it from the poller on completion and on drop.
        if let Err(err) = unsafe { self.poller.add(fd, event) } {
            self.event_map.lock().unwrap().remove(&key);
            return Err(err);
        }

        tracing::trace!(key, ?interest, "registered source");
        Ok(key)
    }

    /// Removes the source from the poller and forgets its waker, if it has
    /// not fired yet.
    pub(crate) fn unregister(&self, key: usize, fd: impl AsSource) -> Result<(), io::Error> {
        self.event_map.lock().unwrap().remove(&key);
        self.poller.delete(fd)?;

        tracing::trace!(key, "unregistered source");
        Ok(())
    }

    /// Replaces the stored waker for `key`. Returns `false` once the
    /// registration has fired.
    pub(crate) fn refresh(&self, key: usize, waker: &Waker) -> bool {
        match self.event_map.lock().unwrap().get_mut(&key) {
            Some(stored) => {
                if !stored.will_wake(waker) {
                    *stored = waker.clone();
                }
                true
            }
            None => false,
        }
    }

    pub fn has_registrations(&self) -> bool {
        !self.event_map.lock().unwrap().is_empty()
    }

    /// Interrupts a concurrent or the next call to `wait_and_wake`.
    pub fn notify(&self) -> io::Result<()> {
        self.poller.notify()
    }

    /// Blocks for at most `timeout` (forever if `None`) and wakes every task
    /// whose source became ready. Returns the number of wakers invoked.
    pub fn wait_and_wake(&self, timeout: Option<Duration>) -> Result<usize, io::Error> {
        let mut events = self.events.lock().unwrap();
        events.clear();

        match self.poller.wait(&mut events, timeout) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(err),
        }

        let ready: Vec<Waker> = {
            let mut event_map = self.event_map.lock().unwrap();
            events
                .iter()
                .filter_map(|event| event_map.remove(&event.key))
                .collect()
        };

        let woken = ready.len();
        for waker in ready {
            waker.wake();
        }

        if woken > 0 {
            tracing::trace!(woken, "reactor woke tasks");
        }
        Ok(woken)
    }

    /// Resolves once `source` is readable.
    pub fn readable<S: AsFd + Unpin>(&self, source: S) -> Readiness<'_, S> {
        Readiness::new(self, source, Interest::Readable)
    }

    /// Resolves once `source` is writable.
    pub fn writable<S: AsFd + Unpin>(&self, source: S) -> Readiness<'_, S> {
        Readiness::new(self, source, Interest::Writable)
    }
}

/// Future returned by [`Reactor::readable`] and [`Reactor::writable`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Readiness<'r, S: AsFd> {
    reactor: &'r Reactor,
    source: S,
    interest: Interest,
    key: Option<usize>,
}

impl<'r, S: AsFd> Readiness<'r, S> {
    fn new(reactor: &'r Reactor, source: S, interest: Interest) -> Self {
        Self {
            reactor,
            source,
            interest,
            key: None,
        }
    }
}

impl<S: AsFd + Unpin> Future for Readiness<'_, S> {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match this.key {
            None => {
                let raw = this.source.as_fd().as_raw_fd();
                let key = this.reactor.register(raw, this.interest, cx.waker().clone())?;
                this.key = Some(key);
                Poll::Pending
            }
            Some(key) => {
                // Spurious wake-up: keep waiting with the latest waker.
                if this.reactor.refresh(key, cx.waker()) {
                    return Poll::Pending;
                }

                this.key = None;
                this.reactor.unregister(key, this.source.as_fd())?;
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl<S: AsFd> Drop for Readiness<'_, S> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Err(err) = self.reactor.unregister(key, self.source.as_fd()) {
                tracing::warn!(key, %err, "failed to unregister dropped readiness source");
            }
        }
    }
}
