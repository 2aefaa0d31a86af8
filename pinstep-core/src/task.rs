use std::fmt;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Waker};

use futures::task::{ArcWake, waker_ref};
use pin_project::pin_project;

use crate::error::JoinError;
use crate::waker::TaskWaker;

/// Identifies a task within one executor. Ids are never reused, so a stale
/// waker can never reschedule a different task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        TaskId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of scheduling: a heap-pinned, type-erased future plus the wake
/// state bound to it.
pub(crate) struct Task {
    future: Pin<Box<dyn Future<Output = ()>>>,
    waker: Arc<TaskWaker>,
}

impl Task {
    pub(crate) fn new(future: Pin<Box<dyn Future<Output = ()>>>, waker: Arc<TaskWaker>) -> Self {
        Task { future, waker }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.waker.id()
    }

    pub(crate) fn is_reachable(&self) -> bool {
        self.waker.is_reachable()
    }

    /// Steps the task once. Must not be called again after it returned
    /// `Ready`; the executor drops the task at that point.
    pub(crate) fn step(&mut self) -> Poll<()> {
        self.waker.clear_scheduled();
        let waker = waker_ref(&self.waker);
        let mut cx = Context::from_waker(&waker);
        self.future.as_mut().poll(&mut cx)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id()).finish_non_exhaustive()
    }
}

enum Stage<T> {
    Running,
    Finished(T),
    Cancelled,
    Consumed,
}

struct JoinState<T> {
    stage: Stage<T>,
    abort: bool,
    waiter: Option<Waker>,
}

/// Producer side of a [`JoinHandle`]. Dropping it before `complete` marks
/// the task cancelled.
struct JoinSlot<T> {
    state: Arc<Mutex<JoinState<T>>>,
}

impl<T> JoinSlot<T> {
    // Also runs from `Drop`, possibly while unwinding, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, JoinState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_requested(&self) -> bool {
        self.lock().abort
    }

    fn complete(&self, output: T) {
        self.finish(Stage::Finished(output));
    }

    fn finish(&self, stage: Stage<T>) {
        let waiter = {
            let mut state = self.lock();
            if !matches!(state.stage, Stage::Running) {
                return;
            }
            state.stage = stage;
            state.waiter.take()
        };

        if let Some(waiter) = waiter {
            waiter.wake();
        }
    }
}

impl<T> Drop for JoinSlot<T> {
    fn drop(&mut self) {
        self.finish(Stage::Cancelled);
    }
}

/// Wraps a spawned future so that its output lands in the join slot and an
/// abort request ends the task without stepping the future again.
#[pin_project]
pub(crate) struct Harness<F: Future> {
    #[pin]
    future: F,
    slot: JoinSlot<F::Output>,
}

impl<F: Future> Future for Harness<F> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();

        if this.slot.abort_requested() {
            tracing::debug!("task aborted");
            return Poll::Ready(());
        }

        match this.future.poll(cx) {
            Poll::Ready(output) => {
                this.slot.complete(output);
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Pairs `future` with a fresh [`JoinHandle`] for the task owning `waker`.
pub(crate) fn joinable<F: Future>(
    future: F,
    waker: &Arc<TaskWaker>,
) -> (Harness<F>, JoinHandle<F::Output>) {
    let state = Arc::new(Mutex::new(JoinState {
        stage: Stage::Running,
        abort: false,
        waiter: None,
    }));

    let harness = Harness {
        future,
        slot: JoinSlot {
            state: state.clone(),
        },
    };
    let handle = JoinHandle {
        id: waker.id(),
        state,
        task: Arc::downgrade(waker),
    };

    (harness, handle)
}

/// A handle to a spawned task.
///
/// Awaiting it yields the task's output, or [`JoinError::Cancelled`] if the
/// task was aborted or its executor was dropped first. Dropping the handle
/// detaches the task; it keeps running.
#[must_use = "dropping a JoinHandle detaches the task"]
pub struct JoinHandle<T> {
    id: TaskId,
    state: Arc<Mutex<JoinState<T>>>,
    // Weak so that holding the handle does not count as a pending wake-up.
    task: Weak<TaskWaker>,
}

impl<T> JoinHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// `true` once the output (or the cancellation) can be collected.
    pub fn is_finished(&self) -> bool {
        !matches!(self.state.lock().unwrap().stage, Stage::Running)
    }

    /// Requests cancellation. The task is dropped on its next step without
    /// polling its future again. Has no effect on a finished task.
    pub fn abort(&self) {
        self.state.lock().unwrap().abort = true;

        if let Some(task) = self.task.upgrade() {
            tracing::debug!(task = %self.id, "abort requested");
            ArcWake::wake_by_ref(&task);
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let poll = {
            let mut state = self.state.lock().unwrap();

            match mem::replace(&mut state.stage, Stage::Consumed) {
                Stage::Finished(output) => Some(Poll::Ready(Ok(output))),
                Stage::Cancelled => Some(Poll::Ready(Err(JoinError::Cancelled))),
                Stage::Running => {
                    state.stage = Stage::Running;
                    match &mut state.waiter {
                        Some(waiter) if waiter.will_wake(cx.waker()) => {}
                        waiter => *waiter = Some(cx.waker().clone()),
                    }
                    Some(Poll::Pending)
                }
                Stage::Consumed => None,
            }
        };

        // The guard is gone here, so the panic leaves the state unpoisoned.
        match poll {
            Some(poll) => poll,
            None => panic!("`JoinHandle` polled after completion"),
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::mpsc::channel;

    use futures::task::noop_waker;

    use crate::trigger::Trigger;

    fn task_waker(id: u64) -> Arc<TaskWaker> {
        let (sender, receiver) = channel();
        // Keep the queue alive for the duration of the test.
        std::mem::forget(receiver);
        TaskWaker::new(TaskId::from_raw(id), sender, Weak::new())
    }

    #[test]
    fn test_harness_delivers_output() {
        let waker_state = task_waker(1);
        let (harness, mut handle) = joinable(async { 42 }, &waker_state);
        let mut task = Task::new(Box::pin(harness), waker_state);

        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);
        assert!(Pin::new(&mut handle).poll(&mut cx).is_pending());

        assert!(task.step().is_ready());
        assert!(handle.is_finished());
        assert_eq!(Pin::new(&mut handle).poll(&mut cx), Poll::Ready(Ok(42)));
    }

    #[test]
    fn test_dropping_pending_task_cancels_handle() {
        let trigger = Trigger::new();
        let waker_state = task_waker(2);
        let (harness, mut handle) = joinable(trigger.wait(1), &waker_state);
        let mut task = Task::new(Box::pin(harness), waker_state);

        assert!(task.step().is_pending());
        assert!(!handle.is_finished());
        drop(task);

        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);
        assert_eq!(
            Pin::new(&mut handle).poll(&mut cx),
            Poll::Ready(Err(JoinError::Cancelled))
        );
        // The event source outlives the task; firing it now is harmless.
        trigger.fire();
    }

    #[test]
    fn test_abort_skips_the_inner_future() {
        let trigger = Trigger::new();
        let waker_state = task_waker(3);
        let (harness, handle) = joinable(trigger.wait(1), &waker_state);
        let mut task = Task::new(Box::pin(harness), waker_state);

        assert!(task.step().is_pending());
        handle.abort();
        trigger.fire();
        assert!(task.step().is_ready());
        drop(task);

        assert!(handle.is_finished());
    }

    #[test]
    #[should_panic(expected = "polled after completion")]
    fn test_handle_polled_after_completion_panics() {
        let waker_state = task_waker(4);
        let (harness, mut handle) = joinable(async {}, &waker_state);
        let mut task = Task::new(Box::pin(harness), waker_state);
        let _ = task.step();

        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);
        let _ = Pin::new(&mut handle).poll(&mut cx);
        let _ = Pin::new(&mut handle).poll(&mut cx);
    }

    #[test]
    fn test_second_poll_panic_leaves_task_droppable() {
        let waker_state = task_waker(5);
        let (harness, mut handle) = joinable(async {}, &waker_state);
        let mut task = Task::new(Box::pin(harness), waker_state);
        assert!(task.step().is_ready());

        let noop = noop_waker();
        let mut cx = Context::from_waker(&noop);
        assert_eq!(Pin::new(&mut handle).poll(&mut cx), Poll::Ready(Ok(())));
        let repoll = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = Pin::new(&mut handle).poll(&mut cx);
        }));

        assert!(repoll.is_err());
        assert!(!handle.state.is_poisoned());
        drop(task);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_poisoned_state_does_not_abort_task_drop() {
        let trigger = Trigger::new();
        let waker_state = task_waker(6);
        let (harness, handle) = joinable(trigger.wait(1), &waker_state);
        let mut task = Task::new(Box::pin(harness), waker_state);
        assert!(task.step().is_pending());

        let state = handle.state.clone();
        let poisoner = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = state.lock().unwrap();
            panic!("poisoning the join state");
        }));
        assert!(poisoner.is_err());
        assert!(handle.state.is_poisoned());

        // The slot still records the cancellation.
        drop(task);
        let stage = handle.state.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(matches!(stage.stage, Stage::Cancelled));
    }
}
