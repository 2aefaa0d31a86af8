use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::pin::pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::task::waker_ref;

use crate::builder::{Builder, Config};
use crate::error::SpawnError;
use crate::reactor::Reactor;
use crate::task::{JoinHandle, Task, TaskId, joinable};
use crate::thread_context::{self, set_thread_context};
use crate::waker::TaskWaker;

/// State shared between an executor and its spawners.
struct Core {
    tasks: RefCell<HashMap<TaskId, Task>>,
    next_id: Cell<u64>,
    sender: Sender<TaskId>,
    reactor: Arc<Reactor>,
}

impl Core {
    fn next_id(&self) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        TaskId::from_raw(id)
    }

    /// Allocates wake state for a new task and puts its id in the ready
    /// queue.
    fn schedule_new(&self) -> Arc<TaskWaker> {
        let id = self.next_id();
        let waker = TaskWaker::new(id, self.sender.clone(), Arc::downgrade(&self.reactor));
        // Cannot fail: the receiver lives as long as the executor owning this core.
        let _ = self.sender.send(id);
        waker
    }

    fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
    {
        let waker = self.schedule_new();
        let id = waker.id();
        let (harness, handle) = joinable(future, &waker);

        self.tasks
            .borrow_mut()
            .insert(id, Task::new(Box::pin(harness), waker));

        tracing::trace!(task = %id, "spawned");
        handle
    }
}

/// A single-threaded, cooperative executor.
///
/// Tasks are stepped in the order their wakers fired. When nothing is ready
/// the calling thread parks on the executor's [`Reactor`] until a waker is
/// invoked (from any thread) or a registered source becomes ready.
///
/// Dropping the executor cancels every task it still owns.
pub struct Executor {
    core: Rc<Core>,
    ready: Receiver<TaskId>,
    config: Config,
}

impl Executor {
    pub fn new() -> io::Result<Self> {
        Builder::new().build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn with_config(config: Config) -> io::Result<Self> {
        let (sender, ready) = channel();
        let reactor = Arc::new(Reactor::with_capacity(config.event_capacity)?);

        let core = Rc::new(Core {
            tasks: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
            sender,
            reactor,
        });

        Ok(Executor {
            core,
            ready,
            config,
        })
    }

    pub fn spawner(&self) -> Spawner {
        Spawner {
            core: Rc::downgrade(&self.core),
        }
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
    {
        self.core.spawn(future)
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.core.reactor
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn len(&self) -> usize {
        self.core.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Steps every task that is ready right now exactly once and returns
    /// the number of steps taken. Tasks woken during this call run on the
    /// next one.
    ///
    /// Readiness events that already arrived are collected first, without
    /// blocking, so reactor-driven tasks advance too.
    pub fn tick(&self) -> io::Result<usize> {
        let _guard = set_thread_context(self.spawner());
        self.core.reactor.wait_and_wake(Some(Duration::ZERO))?;

        let queued: Vec<TaskId> = self.ready.try_iter().collect();
        let mut steps = 0;
        for id in queued {
            if self.step(id) {
                steps += 1;
            }
        }
        Ok(steps)
    }

    /// Drives `future` to completion on the current thread, stepping spawned
    /// tasks along the way.
    ///
    /// Tasks that are still pending when `future` completes stay owned by
    /// the executor; they continue on the next `block_on` or `tick`.
    ///
    /// With stall detection enabled, a spawned task that is pending without
    /// any outstanding waker is cancelled once the executor becomes idle:
    /// it is dropped and its [`JoinHandle`] yields
    /// [`JoinError::Cancelled`](crate::JoinError::Cancelled).
    ///
    /// # Panics
    ///
    /// With stall detection enabled, panics if the executor becomes idle
    /// while `future` itself holds no outstanding waker.
    pub fn block_on<F: Future>(&self, future: F) -> io::Result<F::Output> {
        let _span = tracing::debug_span!("block_on").entered();
        let _guard = set_thread_context(self.spawner());

        let mut root = pin!(future);
        let root_waker = self.core.schedule_new();
        let root_id = root_waker.id();
        let mut budget = self.config.event_interval;

        loop {
            while let Ok(id) = self.ready.try_recv() {
                if id == root_id {
                    root_waker.clear_scheduled();
                    let waker = waker_ref(&root_waker);
                    let mut cx = Context::from_waker(&waker);

                    if let Poll::Ready(output) = root.as_mut().poll(&mut cx) {
                        tracing::debug!(pending = self.len(), "root future complete");
                        return Ok(output);
                    }
                } else {
                    self.step(id);
                }

                budget -= 1;
                if budget == 0 {
                    budget = self.config.event_interval;
                    self.core.reactor.wait_and_wake(Some(Duration::ZERO))?;
                }
            }

            if self.config.stall_detection {
                if !root_waker.is_reachable() {
                    // A wake that raced with the check has already been queued.
                    match self.ready.try_recv() {
                        Ok(id) => {
                            let _ = self.core.sender.send(id);
                            continue;
                        }
                        Err(_) => panic!(
                            "executor stalled: task {root_id} returned `Pending` without arranging to be woken"
                        ),
                    }
                }

                if self.cancel_stalled() > 0 {
                    continue;
                }
            }

            tracing::trace!("parking on reactor");
            self.core.reactor.wait_and_wake(None)?;
        }
    }

    /// Steps the task `id` if it still exists. Returns `false` for stale
    /// wake-ups of finished or cancelled tasks.
    fn step(&self, id: TaskId) -> bool {
        // Take the task out so it can spawn onto this executor while being stepped.
        let task = self.core.tasks.borrow_mut().remove(&id);
        let Some(mut task) = task else {
            tracing::trace!(task = %id, "stale wake-up");
            return false;
        };

        match task.step() {
            Poll::Ready(()) => {
                tracing::trace!(task = %id, "task complete");
                drop(task);
            }
            Poll::Pending => {
                self.core.tasks.borrow_mut().insert(id, task);
            }
        }
        true
    }

    /// Drops every pending task that nothing can wake any more and returns
    /// how many were dropped.
    fn cancel_stalled(&self) -> usize {
        let stalled: Vec<Task> = {
            let mut tasks = self.core.tasks.borrow_mut();
            let ids: Vec<TaskId> = tasks
                .values()
                .filter(|task| !task.is_reachable())
                .map(Task::id)
                .collect();
            ids.iter().filter_map(|id| tasks.remove(id)).collect()
        };

        for task in &stalled {
            tracing::error!(
                task = %task.id(),
                "task returned `Pending` without arranging to be woken, cancelling it"
            );
        }

        // Dropped outside the borrow, same as in `Drop for Executor`.
        let count = stalled.len();
        drop(stalled);
        count
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Dropped outside the borrow: a task's destructor may touch the executor.
        let tasks = mem::take(&mut *self.core.tasks.borrow_mut());
        if !tasks.is_empty() {
            tracing::debug!(cancelled = tasks.len(), "dropping executor with pending tasks");
        }
        drop(tasks);
    }
}

/// A cloneable handle for spawning tasks onto an [`Executor`] without
/// borrowing it.
#[derive(Clone)]
pub struct Spawner {
    core: Weak<Core>,
}

impl Spawner {
    /// Spawns `future` as a new task.
    ///
    /// # Panics
    ///
    /// Panics if the executor has been dropped.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
    {
        match self.try_spawn(future) {
            Ok(handle) => handle,
            Err(err) => panic!("failed to spawn task: {err}"),
        }
    }

    pub fn try_spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>, SpawnError>
    where
        F: Future + 'static,
    {
        let core = self.core.upgrade().ok_or(SpawnError::Closed)?;
        Ok(core.spawn(future))
    }

    #[cfg(test)]
    pub(crate) fn is_bound_to(&self, executor: &Executor) -> bool {
        Weak::as_ptr(&self.core) == Rc::as_ptr(&executor.core)
    }
}

/// Runs `future` to completion on a fresh executor, blocking the calling
/// thread. This is the bridge from synchronous code into async code.
///
/// # Panics
///
/// Panics if the OS poller cannot be created or waited on, and on stalls
/// (see [`Executor::block_on`]).
pub fn run<F: Future>(future: F) -> F::Output {
    let executor = match Executor::new() {
        Ok(executor) => executor,
        Err(err) => panic!("failed to create executor: {err}"),
    };

    match executor.block_on(future) {
        Ok(output) => output,
        Err(err) => panic!("executor failed while waiting for events: {err}"),
    }
}

/// Spawns `future` onto the executor currently running on this thread.
///
/// # Panics
///
/// Panics if called outside of `block_on` or `tick`.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
{
    match thread_context::current() {
        Some(spawner) => spawner.spawn(future),
        None => panic!("`spawn` called outside of an executor context"),
    }
}
