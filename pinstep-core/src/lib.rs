//! A small cooperative executor built on the standard `Future`/`Pin`/`Waker`
//! contract.
//!
//! - [`run`] drives one root future to completion on the calling thread.
//! - [`Executor`] owns spawned [tasks](JoinHandle), a FIFO ready queue fed by
//!   task wakers, and a [`Reactor`] it parks on while idle.
//! - [`join_all`], [`join`] and [`race`] compose futures without spawning.
//! - [`FirstWord`] is a hand-lowered, self-referential state machine, and
//!   [`Guarded`] and [`Trigger`] are helpers for driving futures step by
//!   step.
//!
//! ```
//! use pinstep_core::{join_all, run, spawn, yield_now};
//!
//! let outputs = run(async {
//!     let handles = (0..3).map(|i| {
//!         spawn(async move {
//!             yield_now().await;
//!             i * 2
//!         })
//!     });
//!     join_all(handles).await
//! });
//!
//! let outputs: Vec<_> = outputs.into_iter().map(Result::unwrap).collect();
//! assert_eq!(outputs, [0, 2, 4]);
//! ```

mod builder;
mod error;
mod executor;
mod future;
mod join;
mod race;
pub mod reactor;
mod state_machine;
mod task;
#[cfg(test)]
mod test_util;
mod thread_context;
mod trigger;
mod waker;

pub use builder::Builder;
pub use error::{JoinError, SpawnError};
pub use executor::{Executor, Spawner, run, spawn};
pub use future::{Guarded, YieldNow, guarded, yield_now};
pub use join::{Join, JoinAll, join, join_all};
pub use race::{Race, race};
pub use reactor::{Interest, Reactor, Readiness};
pub use state_machine::FirstWord;
pub use task::{JoinHandle, TaskId};
pub use thread_context::current;
pub use trigger::{Trigger, Wait};
