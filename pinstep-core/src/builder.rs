use std::io;
use std::num::NonZeroUsize;

use crate::executor::Executor;

pub(crate) const DEFAULT_EVENT_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();
pub(crate) const DEFAULT_EVENT_INTERVAL: u32 = 61;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Config {
    pub(crate) event_capacity: NonZeroUsize,
    pub(crate) event_interval: u32,
    pub(crate) stall_detection: bool,
}

/// Builder for configuring and creating an [`Executor`].
///
/// ```
/// let executor = pinstep_core::Builder::new()
///     .event_interval(16)
///     .build()
///     .unwrap();
/// assert_eq!(executor.block_on(async { 1 + 1 }).unwrap(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            config: Config {
                event_capacity: DEFAULT_EVENT_CAPACITY,
                event_interval: DEFAULT_EVENT_INTERVAL,
                stall_detection: true,
            },
        }
    }

    /// Number of readiness events collected per reactor wait.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_capacity(mut self, n: usize) -> Self {
        let Some(capacity) = NonZeroUsize::new(n) else {
            panic!("event_capacity must be > 0");
        };

        self.config.event_capacity = capacity;
        self
    }

    /// Number of task steps after which the executor checks the reactor
    /// for ready sources without blocking, even if tasks are still queued.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_interval(mut self, n: u32) -> Self {
        assert!(n > 0, "event_interval must be > 0");

        self.config.event_interval = n;
        self
    }

    /// Whether an idle executor panics when a pending task can no longer be
    /// woken by anyone. Enabled by default.
    pub fn stall_detection(mut self, enabled: bool) -> Self {
        self.config.stall_detection = enabled;
        self
    }

    /// Creates the executor and its reactor.
    pub fn build(self) -> io::Result<Executor> {
        Executor::with_config(self.config)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
