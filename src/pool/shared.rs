use crate::pool::builder::PoolConfig;
use crate::task::id::IdGenerator;
use crate::task::{Group, GroupId, Task, TaskEntry, TaskId};
use crate::utils::Semaphore;
use parking_lot::Mutex;
use slab::Slab;
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, warn};

/// State shared between the pool value, its handles, and the workers.
///
/// One mutex serializes everything that is not atomic: both queues, both id
/// maps, the record slab, the id generator, and the worker map. It is never
/// held across user work, a semaphore operation, or a join, so contention is
/// bounded by the submission and dequeue rate rather than by work duration.
pub(crate) struct Shared {
    pub(crate) cfg: PoolConfig,

    pub(crate) state: Mutex<State>,

    /// One permit per entry in the ready queue, plus one per worker at
    /// shutdown.
    pub(crate) task_available: Semaphore,

    /// Number of low-priority tasks currently in the ready queue or being
    /// executed by a worker (cooperative mode).
    pub(crate) low_priority_threads_used: AtomicU32,

    pub(crate) exit_threads: AtomicBool,
}

pub(crate) struct State {
    /// Record pool for queue-resident tasks. Both queues store keys into it,
    /// so moving a record between queues never touches the record itself.
    pub(crate) queued: Slab<Task>,

    /// FIFO of tasks immediately eligible for execution.
    pub(crate) ready_queue: VecDeque<usize>,

    /// FIFO of low-priority tasks deferred because the quota is saturated.
    pub(crate) low_priority_backlog: VecDeque<usize>,

    /// Registry halves of single tasks. Group fan-out records are not in
    /// here; groups are tracked in `groups`.
    pub(crate) tasks: HashMap<TaskId, TaskEntry>,

    pub(crate) groups: HashMap<GroupId, Arc<Group>>,

    /// Thread identity of every pool worker, used to detect re-entrant
    /// waiters.
    pub(crate) worker_ids: HashMap<ThreadId, usize>,

    pub(crate) workers: Vec<JoinHandle<()>>,

    pub(crate) ids: IdGenerator,
}

impl Shared {
    pub(crate) fn new(cfg: PoolConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                queued: Slab::new(),
                ready_queue: VecDeque::new(),
                low_priority_backlog: VecDeque::new(),
                tasks: HashMap::new(),
                groups: HashMap::new(),
                worker_ids: HashMap::new(),
                workers: Vec::new(),
                ids: IdGenerator::new(),
            }),
            task_available: Semaphore::default(),
            low_priority_threads_used: AtomicU32::new(0),
            exit_threads: AtomicBool::new(false),
        }
    }

    /// Pops the head of the ready queue and runs it on the current thread.
    /// Returns false if the queue was empty (a shutdown permit was consumed).
    pub(crate) fn run_next_ready(&self) -> bool {
        let task = {
            let mut state = self.state.lock();
            let Some(key) = state.ready_queue.pop_front() else {
                return false;
            };
            state.queued.remove(key)
        };

        self.process_task(task);
        true
    }

    /// A low-priority task finished: hand its quota slot to the oldest
    /// backlog entry, or release the slot if the backlog is empty. One
    /// critical section; the semaphore is posted after the lock is dropped.
    pub(crate) fn promote_backlog(&self) {
        let promoted = {
            let mut state = self.state.lock();
            match state.low_priority_backlog.pop_front() {
                Some(key) => {
                    state.ready_queue.push_back(key);
                    true
                }
                None => {
                    self.low_priority_threads_used.fetch_sub(1, Ordering::Relaxed);
                    false
                }
            }
        };

        if promoted {
            self.task_available.post();
        }
    }

    /// Drains the pool: warns about backlog entries that will never run,
    /// signals every worker to exit, and joins them. Idempotent.
    pub(crate) fn shutdown(&self) {
        let workers = {
            let mut state = self.state.lock();
            if state.workers.is_empty() {
                return;
            }

            while let Some(key) = state.low_priority_backlog.pop_front() {
                let task = state.queued.remove(key);
                warn!(
                    description = task.description(),
                    "low-priority task was never re-claimed"
                );
            }

            mem::take(&mut state.workers)
        };

        self.exit_threads.store(true, Ordering::Release);
        for _ in 0..workers.len() {
            self.task_available.post();
        }

        let panicked = workers
            .into_iter()
            .map(|handle| handle.join())
            .filter(Result::is_err)
            .count();
        if panicked > 0 {
            warn!(panicked, "worker thread(s) panicked");
        }

        self.state.lock().worker_ids.clear();
        debug!("worker pool shut down");
    }
}
