//! The worker pool: a fixed set of persistent threads consuming prioritized
//! single and group tasks.

use crate::callable::Callable;
use crate::errors::PoolError;
use crate::pool::builder::PoolConfig;
use crate::pool::shared::Shared;
use crate::task::{GroupId, TaskId};
use std::sync::Arc;
use std::thread;
use tracing::debug;

pub mod builder;
pub use builder::Builder;

pub mod global;

mod handle;
pub use handle::PoolHandle;

pub(crate) mod shared;

pub(crate) mod worker;

#[cfg(test)]
mod tests;

/// An owned, running worker pool.
///
/// Built through [`Builder`], torn down by [`finish`] (or on drop). All task
/// operations are also available on the cloneable [`PoolHandle`] returned by
/// [`handle`], which is what submitted tasks capture when they need to
/// re-enter the pool.
///
/// [`finish`]: WorkerPool::finish
/// [`handle`]: WorkerPool::handle
pub struct WorkerPool {
    handle: PoolHandle,
}

impl WorkerPool {
    /// Spawns the configured worker threads and records their identities so
    /// re-entrant waiters can be recognized.
    pub(crate) fn start(cfg: PoolConfig) -> WorkerPool {
        let shared = Arc::new(Shared::new(cfg));

        for index in 0..shared.cfg.worker_threads {
            let mut builder =
                thread::Builder::new().name(format!("{}-{index}", shared.cfg.thread_name_prefix));
            if let Some(stack_size) = shared.cfg.thread_stack_size {
                builder = builder.stack_size(stack_size);
            }

            let worker_shared = Arc::clone(&shared);
            let handle = builder
                .spawn(move || worker::run(worker_shared))
                .expect("failed to spawn worker thread");

            let mut state = shared.state.lock();
            state.worker_ids.insert(handle.thread().id(), index);
            state.workers.push(handle);
        }

        debug!(workers = shared.cfg.worker_threads, "worker pool started");
        WorkerPool {
            handle: PoolHandle { shared },
        }
    }

    /// Returns a cheap handle to the pool.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Shuts the pool down: warns about backlog tasks that will never run,
    /// lets in-flight tasks finish, and joins every worker. Idempotent;
    /// also runs on drop.
    pub fn finish(&self) {
        self.handle.shared.shutdown();
    }

    /// See [`PoolHandle::add_task`].
    pub fn add_task(
        &self,
        callable: Arc<dyn Callable>,
        high_priority: bool,
        description: &str,
    ) -> TaskId {
        self.handle.add_task(callable, high_priority, description)
    }

    /// See [`PoolHandle::add_native_task`].
    pub fn add_native_task<F>(&self, f: F, high_priority: bool, description: &str) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.add_native_task(f, high_priority, description)
    }

    /// See [`PoolHandle::add_group_task`].
    pub fn add_group_task(
        &self,
        callable: Arc<dyn Callable>,
        elements: u32,
        fanout: i32,
        high_priority: bool,
        description: &str,
    ) -> Result<GroupId, PoolError> {
        self.handle
            .add_group_task(callable, elements, fanout, high_priority, description)
    }

    /// See [`PoolHandle::add_native_group_task`].
    pub fn add_native_group_task<F>(
        &self,
        f: F,
        elements: u32,
        fanout: i32,
        high_priority: bool,
        description: &str,
    ) -> Result<GroupId, PoolError>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.handle
            .add_native_group_task(f, elements, fanout, high_priority, description)
    }

    /// See [`PoolHandle::is_task_completed`].
    pub fn is_task_completed(&self, id: TaskId) -> Result<bool, PoolError> {
        self.handle.is_task_completed(id)
    }

    /// See [`PoolHandle::is_group_task_completed`].
    pub fn is_group_task_completed(&self, id: GroupId) -> Result<bool, PoolError> {
        self.handle.is_group_task_completed(id)
    }

    /// See [`PoolHandle::wait_for_task_completion`].
    pub fn wait_for_task_completion(&self, id: TaskId) -> Result<(), PoolError> {
        self.handle.wait_for_task_completion(id)
    }

    /// See [`PoolHandle::wait_for_group_task_completion`].
    pub fn wait_for_group_task_completion(&self, id: GroupId) -> Result<(), PoolError> {
        self.handle.wait_for_group_task_completion(id)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handle.shared.cfg.worker_threads)
            .finish()
    }
}
