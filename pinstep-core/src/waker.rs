use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};

use futures::task::ArcWake;

use crate::reactor::Reactor;
use crate::task::TaskId;

/// Wake-up state shared between an executor and every [`Waker`] it issued
/// for one task.
///
/// Waking only enqueues the task id. Repeated wakes before the next step
/// coalesce into one enqueue through the `scheduled` flag, and once the
/// executor is gone waking does nothing.
///
/// [`Waker`]: std::task::Waker
pub(crate) struct TaskWaker {
    id: TaskId,
    scheduled: AtomicBool,
    ready: Sender<TaskId>,
    reactor: Weak<Reactor>,
}

impl TaskWaker {
    /// Creates the waker state for a task that is already in the ready
    /// queue.
    pub(crate) fn new(id: TaskId, ready: Sender<TaskId>, reactor: Weak<Reactor>) -> Arc<Self> {
        Arc::new(TaskWaker {
            id,
            scheduled: AtomicBool::new(true),
            ready,
            reactor,
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    /// Called by the executor right before stepping the task, so wakes that
    /// happen during the step schedule it again.
    pub(crate) fn clear_scheduled(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    /// `true` if some waker handed out for this task may still be invoked.
    /// The executor's own `Arc` is the only one otherwise.
    pub(crate) fn is_reachable(self: &Arc<Self>) -> bool {
        self.scheduled.load(Ordering::Acquire) || Arc::strong_count(self) > 1
    }
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.scheduled.swap(true, Ordering::AcqRel) {
            tracing::trace!(task = %arc_self.id, "already scheduled");
            return;
        }

        // The receiver is gone once the executor was dropped.
        if arc_self.ready.send(arc_self.id).is_err() {
            return;
        }

        tracing::trace!(task = %arc_self.id, "woken");
        if let Some(reactor) = arc_self.reactor.upgrade() {
            if let Err(err) = reactor.notify() {
                tracing::warn!(%err, "failed to unpark executor");
            }
        }
    }
}
