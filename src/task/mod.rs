//! Task and group records.
//!
//! A submission is split in two, the way a task is split between registry
//! and scheduler in a work-stealing runtime: the *queue half* (`Task`) owns
//! the work and travels through the ready queue, the backlog, or a dedicated
//! thread; the *registry half* (`TaskEntry`, single tasks only) stays in the
//! id map so completion stays observable after the work has run. The two
//! halves meet in a shared [`Completion`].

use crate::callable::Callable;
use crate::utils::Semaphore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::thread::JoinHandle;

pub mod id;
pub use id::{GroupId, TaskId};

/// Shared completion record for a single task: the waiter blocks on `done`,
/// queries read `completed`.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    pub(crate) completed: AtomicBool,
    pub(crate) done: Semaphore,
}

/// A parallel fan-out over `[0, max)`, shared by the fan-out records and the
/// group map. The last reference dropped frees it.
#[derive(Debug, Default)]
pub(crate) struct Group {
    /// Total number of work items.
    pub(crate) max: u32,

    /// Next work-item index to claim. Claimed by atomic post-increment, so
    /// exactly one claimant observes the exact `max` value and signals
    /// completion; later claimants are stragglers.
    pub(crate) index: AtomicU32,

    pub(crate) completed: AtomicBool,

    /// Posted once, by the claimant that observed `index == max`. Unused in
    /// dedicated-thread mode, where the waiter joins threads instead.
    pub(crate) done: Semaphore,

    /// One handle per dedicated low-priority thread, in posting order.
    /// Empty in cooperative mode; the waiter drains and joins them.
    pub(crate) dedicated_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Group {
    pub(crate) fn new(max: u32) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }
}

/// The work carried by a single task.
pub(crate) enum SingleWork {
    Native(Box<dyn FnOnce() + Send + 'static>),
    Callable(Arc<dyn Callable>),
}

/// The work carried by each fan-out record of a group, shared across the
/// fan-out width.
#[derive(Clone)]
pub(crate) enum GroupWork {
    Native(Arc<dyn Fn(u32) + Send + Sync + 'static>),
    Callable(Arc<dyn Callable>),
}

pub(crate) struct SingleTask {
    pub(crate) id: TaskId,
    pub(crate) work: SingleWork,
    pub(crate) completion: Arc<Completion>,
    pub(crate) description: Arc<str>,
    pub(crate) low_priority: bool,
}

pub(crate) struct GroupTask {
    /// Id of the owning group; fan-out records have no id of their own.
    pub(crate) id: GroupId,
    pub(crate) work: GroupWork,
    pub(crate) group: Arc<Group>,
    pub(crate) description: Arc<str>,
    pub(crate) low_priority: bool,
}

/// A queue-resident unit of work. Lives in the pool's record slab while
/// queued, then is moved out and consumed by whichever thread runs it.
pub(crate) enum Task {
    Single(SingleTask),
    Group(GroupTask),
}

impl Task {
    pub(crate) fn is_low_priority(&self) -> bool {
        match self {
            Task::Single(t) => t.low_priority,
            Task::Group(t) => t.low_priority,
        }
    }

    pub(crate) fn description(&self) -> &str {
        match self {
            Task::Single(t) => &t.description,
            Task::Group(t) => &t.description,
        }
    }
}

/// Registry half of a single task: stays in the id map from submission until
/// the matching wait returns, so `is_task_completed` can look the id up
/// after the work has finished.
pub(crate) struct TaskEntry {
    pub(crate) completion: Arc<Completion>,
    pub(crate) description: Arc<str>,
    pub(crate) low_priority: bool,

    /// At most one caller may wait per task id.
    pub(crate) waiting: bool,

    /// Set when the task runs on its own native thread instead of the
    /// worker pool; the waiter joins it.
    pub(crate) dedicated_thread: Option<JoinHandle<()>>,
}

impl TaskEntry {
    pub(crate) fn new(
        completion: Arc<Completion>,
        description: Arc<str>,
        low_priority: bool,
    ) -> Self {
        Self {
            completion,
            description,
            low_priority,
            waiting: false,
            dedicated_thread: None,
        }
    }
}
