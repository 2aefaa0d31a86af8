use core::fmt;

/// Returned by a [`JoinHandle`](crate::task::JoinHandle) whose task did not
/// run to completion.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinError {
    /// The task was aborted, or its executor was dropped while the task was
    /// still pending.
    Cancelled,
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Cancelled => f.write_str("task was cancelled"),
        }
    }
}

impl core::error::Error for JoinError {}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpawnError {
    /// The executor behind the spawner has been dropped.
    Closed,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::Closed => f.write_str("executor was closed"),
        }
    }
}

impl core::error::Error for SpawnError {}
