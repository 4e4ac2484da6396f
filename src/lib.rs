//! `taskmill` is a prioritized worker thread pool for CPU-bound work in a
//! long-running host process.
//!
//! A fixed set of persistent workers consumes two kinds of submissions:
//! *single tasks* (one callback) and *group tasks* (a data-parallel fan-out
//! over an index range). Low-priority work is admitted against a quota so
//! long-running background jobs cannot monopolize the pool, or routed to
//! dedicated native threads when configured. Waiting is re-entrant: a task
//! that blocks on child work keeps draining the ready queue instead of
//! deadlocking the pool.
//!
//! ```no_run
//! use taskmill::Builder;
//!
//! let pool = Builder::new().worker_threads(4).try_build().unwrap();
//!
//! let id = pool.add_native_task(|| println!("on a worker"), true, "greet");
//! pool.wait_for_task_completion(id).unwrap();
//!
//! let gid = pool
//!     .add_native_group_task(|i| println!("item {i}"), 100, -1, true, "fan")
//!     .unwrap();
//! pool.wait_for_group_task_completion(gid).unwrap();
//!
//! pool.finish();
//! ```

pub mod callable;

pub mod errors;

pub mod pool;
pub use pool::{Builder, PoolHandle, WorkerPool, global};

pub mod task;
pub use task::{GroupId, TaskId};

pub use callable::{CallError, Callable};
pub use errors::PoolError;

pub(crate) mod utils;
