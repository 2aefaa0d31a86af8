use std::cell::RefCell;
use std::thread_local;

use crate::executor::Spawner;

pub(crate) struct ThreadContext {
    spawner: Spawner,
}

/// Restores the previously installed context when dropped, so executors can
/// be nested on one thread.
pub(crate) struct ThreadContextGuard {
    old_context: Option<ThreadContext>,
}

thread_local! {
    static CONTEXT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

pub(crate) fn set_thread_context(spawner: Spawner) -> ThreadContextGuard {
    let old_context =
        CONTEXT.with(|context| context.borrow_mut().replace(ThreadContext { spawner }));

    ThreadContextGuard { old_context }
}

fn reset_thread_context(old_context: Option<ThreadContext>) {
    CONTEXT.with(|context| {
        *context.borrow_mut() = old_context;
    });
}

impl Drop for ThreadContextGuard {
    fn drop(&mut self) {
        reset_thread_context(self.old_context.take());
    }
}

/// The spawner of the executor currently driving this thread, if any.
pub fn current() -> Option<Spawner> {
    CONTEXT.with(|context| context.borrow().as_ref().map(|ctx| ctx.spawner.clone()))
}
