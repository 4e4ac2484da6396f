use crate::task::{GroupId, TaskId};

/// A centralized error type for all pool operations.
#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    /// A submission argument was rejected before anything was allocated.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The task id is not present in the pool, either because it was never
    /// issued or because a completed wait already reclaimed it.
    #[error("invalid task id: {0}")]
    InvalidTask(TaskId),

    /// The group id is not present in the pool.
    #[error("invalid group id: {0}")]
    InvalidGroup(GroupId),

    /// At most one caller may wait on a given task id.
    #[error("another thread is already waiting on task {id} ({description})")]
    ConcurrentWait { id: TaskId, description: String },

    /// The process-wide pool is already running. Call `global::finish` before
    /// initializing again.
    #[error("worker pool is already initialized")]
    AlreadyInitialized,
}

impl PartialEq for PoolError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidArgument(a), Self::InvalidArgument(b)) => a == b,
            (Self::InvalidTask(a), Self::InvalidTask(b)) => a == b,
            (Self::InvalidGroup(a), Self::InvalidGroup(b)) => a == b,
            (Self::ConcurrentWait { id: a, .. }, Self::ConcurrentWait { id: b, .. }) => a == b,
            (Self::AlreadyInitialized, Self::AlreadyInitialized) => true,
            _ => false,
        }
    }
}
