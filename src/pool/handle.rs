use crate::callable::Callable;
use crate::errors::PoolError;
use crate::pool::shared::Shared;
use crate::task::{
    Completion, Group, GroupId, GroupTask, GroupWork, SingleTask, SingleWork, Task, TaskEntry,
    TaskId,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Interval between polls while a worker waits re-entrantly on one of its
/// own children. A latency/CPU trade-off; platforms with a multi-object
/// wait could replace the sleep entirely.
const COOPERATIVE_POLL_INTERVAL: Duration = Duration::from_micros(1);

/// A cheap, cloneable handle to a running [`WorkerPool`].
///
/// Handles are how tasks re-enter the pool: a task that submits and waits on
/// child work captures a clone of the handle. All submission, query, and
/// wait operations live here.
///
/// [`WorkerPool`]: crate::pool::WorkerPool
#[derive(Clone)]
pub struct PoolHandle {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("workers", &self.shared.cfg.worker_threads)
            .finish()
    }
}

impl PoolHandle {
    /// Submits a scripted callback as a single task and returns its id.
    ///
    /// The callable is invoked once with zero arguments. A reported call
    /// error is recorded and the task still counts as completed.
    pub fn add_task(
        &self,
        callable: Arc<dyn Callable>,
        high_priority: bool,
        description: &str,
    ) -> TaskId {
        self.add_single(SingleWork::Callable(callable), high_priority, description)
    }

    /// Submits a native closure as a single task and returns its id.
    pub fn add_native_task<F>(&self, f: F, high_priority: bool, description: &str) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_single(SingleWork::Native(Box::new(f)), high_priority, description)
    }

    /// Submits a scripted callback as a parallel fan-out over
    /// `[0, elements)` and returns the group id.
    ///
    /// The callable is invoked once per work index, with that index as its
    /// single argument, from up to `fanout` threads concurrently. A negative
    /// `fanout` means "one record per pool worker".
    pub fn add_group_task(
        &self,
        callable: Arc<dyn Callable>,
        elements: u32,
        fanout: i32,
        high_priority: bool,
        description: &str,
    ) -> Result<GroupId, PoolError> {
        self.add_group(
            GroupWork::Callable(callable),
            elements,
            fanout,
            high_priority,
            description,
        )
    }

    /// Submits a native closure as a parallel fan-out over `[0, elements)`
    /// and returns the group id. See [`add_group_task`].
    ///
    /// [`add_group_task`]: PoolHandle::add_group_task
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
        self.add_group(
            GroupWork::Native(Arc::new(f)),
            elements,
            fanout,
            high_priority,
            description,
        )
    }

    /// Whether the task has finished executing. Fails with `InvalidTask`
    /// once the matching wait has reclaimed the id.
    pub fn is_task_completed(&self, id: TaskId) -> Result<bool, PoolError> {
        let state = self.shared.state.lock();
        state
            .tasks
            .get(&id)
            .map(|entry| entry.completion.completed.load(Ordering::Acquire))
            .ok_or(PoolError::InvalidTask(id))
    }

    /// Whether every work index of the group has been claimed and the
    /// completion signal raised.
    pub fn is_group_task_completed(&self, id: GroupId) -> Result<bool, PoolError> {
        let state = self.shared.state.lock();
        state
            .groups
            .get(&id)
            .map(|group| group.completed.load(Ordering::Acquire))
            .ok_or(PoolError::InvalidGroup(id))
    }

    /// Blocks until the task has finished, then reclaims its id.
    ///
    /// At most one caller may wait per id. A caller that is itself a pool
    /// worker does not block: it keeps executing other ready tasks inline
    /// until its target completes, so a pool whose workers all wait on
    /// children still makes progress.
    pub fn wait_for_task_completion(&self, id: TaskId) -> Result<(), PoolError> {
        let (completion, dedicated_thread, caller_is_worker) = {
            let mut state = self.shared.state.lock();
            let caller_is_worker = state.worker_ids.contains_key(&thread::current().id());

            let entry = state.tasks.get_mut(&id).ok_or(PoolError::InvalidTask(id))?;
            if entry.waiting {
                return Err(PoolError::ConcurrentWait {
                    id,
                    description: entry.description.to_string(),
                });
            }
            entry.waiting = true;

            let dedicated_thread =
                if entry.low_priority && self.shared.cfg.use_native_low_priority_threads {
                    entry.dedicated_thread.take()
                } else {
                    None
                };

            (
                Arc::clone(&entry.completion),
                dedicated_thread,
                caller_is_worker,
            )
        };

        if let Some(handle) = dedicated_thread {
            if handle.join().is_err() {
                warn!(task = %id, "dedicated low-priority thread panicked");
            }
        } else if caller_is_worker {
            self.wait_cooperatively(&completion);
        } else {
            completion.done.wait();
        }

        self.shared.state.lock().tasks.remove(&id);
        Ok(())
    }

    /// Blocks until every work index of the group has been processed, then
    /// reclaims the group id.
    pub fn wait_for_group_task_completion(&self, id: GroupId) -> Result<(), PoolError> {
        let group = {
            let state = self.shared.state.lock();
            state
                .groups
                .get(&id)
                .cloned()
                .ok_or(PoolError::InvalidGroup(id))?
        };

        let dedicated: Vec<_> = {
            let mut handles = group.dedicated_threads.lock();
            handles.drain(..).collect()
        };

        if dedicated.is_empty() {
            group.done.wait();
        } else {
            for handle in dedicated {
                if handle.join().is_err() {
                    warn!(group = %id, "dedicated low-priority thread panicked");
                }
            }
        }

        self.shared.state.lock().groups.remove(&id);
        Ok(())
    }
}

// --- Submission internals ---

impl PoolHandle {
    fn add_single(&self, work: SingleWork, high_priority: bool, description: &str) -> TaskId {
        let completion = Arc::new(Completion::default());
        let description: Arc<str> = Arc::from(description);
        let low_priority = !high_priority;

        let id = {
            let mut state = self.shared.state.lock();
            let id = state.ids.next();
            state.tasks.insert(
                id,
                TaskEntry::new(
                    Arc::clone(&completion),
                    Arc::clone(&description),
                    low_priority,
                ),
            );
            id
        };

        self.post_task(Task::Single(SingleTask {
            id,
            work,
            completion,
            description,
            low_priority,
        }));

        id
    }

    fn add_group(
        &self,
        work: GroupWork,
        elements: u32,
        fanout: i32,
        high_priority: bool,
        description: &str,
    ) -> Result<GroupId, PoolError> {
        if elements == 0 {
            return Err(PoolError::InvalidArgument("group elements must be positive"));
        }
        if fanout == 0 {
            return Err(PoolError::InvalidArgument("group fanout must be non-zero"));
        }

        let tasks_used = if fanout < 0 {
            self.shared.cfg.worker_threads as u32
        } else {
            fanout as u32
        };

        let group = Arc::new(Group::new(elements));
        let description: Arc<str> = Arc::from(description);
        let low_priority = !high_priority;

        let id = {
            let mut state = self.shared.state.lock();
            let id = state.ids.next();
            state.groups.insert(id, Arc::clone(&group));
            id
        };

        for _ in 0..tasks_used {
            self.post_task(Task::Group(GroupTask {
                id,
                work: work.clone(),
                group: Arc::clone(&group),
                description: Arc::clone(&description),
                low_priority,
            }));
        }

        Ok(id)
    }

    /// The dispatch policy. High-priority work always enters the ready
    /// queue. Low-priority work enters the ready queue while the quota has
    /// room, runs on a dedicated native thread in native mode, and is
    /// deferred to the backlog otherwise.
    fn post_task(&self, task: Task) {
        if task.is_low_priority() && self.shared.cfg.use_native_low_priority_threads {
            self.spawn_dedicated(task);
            return;
        }

        let admitted = {
            let mut state = self.shared.state.lock();
            let low_priority = task.is_low_priority();

            if !low_priority
                || self.shared.low_priority_threads_used.load(Ordering::Relaxed)
                    < self.shared.cfg.max_low_priority_threads
            {
                if low_priority {
                    self.shared
                        .low_priority_threads_used
                        .fetch_add(1, Ordering::Relaxed);
                }
                let key = state.queued.insert(task);
                state.ready_queue.push_back(key);
                true
            } else {
                let key = state.queued.insert(task);
                state.low_priority_backlog.push_back(key);
                false
            }
        };

        if admitted {
            self.shared.task_available.post();
        }
    }

    /// Runs a low-priority task on its own short-lived native thread,
    /// bypassing the worker pool, and records the handle where the waiter
    /// will find it.
    fn spawn_dedicated(&self, task: Task) {
        static DEDICATED_THREADS: AtomicUsize = AtomicUsize::new(0);
        let n = DEDICATED_THREADS.fetch_add(1, Ordering::Relaxed);

        enum Target {
            Entry(TaskId),
            Group(Arc<Group>),
        }

        let target = match &task {
            Task::Single(t) => Target::Entry(t.id),
            Task::Group(t) => Target::Group(Arc::clone(&t.group)),
        };

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("{}-lp-{n}", self.shared.cfg.thread_name_prefix))
            .spawn(move || shared.process_task(task))
            .expect("failed to spawn dedicated low-priority thread");

        match target {
            Target::Entry(id) => {
                let mut state = self.shared.state.lock();
                if let Some(entry) = state.tasks.get_mut(&id) {
                    entry.dedicated_thread = Some(handle);
                }
                // A waiter that raced us here falls back to the done
                // semaphore, which single tasks always post.
            }
            Target::Group(group) => group.dedicated_threads.lock().push(handle),
        }
    }

    fn wait_cooperatively(&self, completion: &Completion) {
        loop {
            if completion.done.try_wait() {
                return;
            }

            if self.shared.task_available.try_wait() {
                if !self.shared.run_next_ready() {
                    // The permit belonged to a shutdown signal, not a queued
                    // task. Give it back so a parked worker can exit.
                    self.shared.task_available.post();
                    thread::sleep(COOPERATIVE_POLL_INTERVAL);
                }
                continue;
            }

            thread::sleep(COOPERATIVE_POLL_INTERVAL);
        }
    }
}
