use crate::callable::CallError;
use crate::pool::shared::Shared;
use crate::task::{GroupTask, GroupWork, SingleTask, SingleWork, Task, TaskId};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::error;

/// Body of every persistent worker thread: park on the availability
/// semaphore, exit if the pool is shutting down, otherwise consume one ready
/// task.
pub(crate) fn run(shared: Arc<Shared>) {
    loop {
        shared.task_available.wait();
        if shared.exit_threads.load(Ordering::Acquire) {
            break;
        }
        shared.run_next_ready();
    }
}

impl Shared {
    /// Runs one task to completion on the current thread, then applies the
    /// low-priority promotion policy. Called by workers, by dedicated
    /// low-priority threads, and by re-entrant waiters draining the queue
    /// inline.
    pub(crate) fn process_task(&self, task: Task) {
        let low_priority = task.is_low_priority();

        match task {
            Task::Single(task) => run_single(task),
            Task::Group(task) => self.run_group(task),
        }

        if low_priority && !self.cfg.use_native_low_priority_threads {
            self.promote_backlog();
        }
    }

    fn run_group(&self, task: GroupTask) {
        let group = &task.group;

        let mut first_at_max = false;
        loop {
            let work_index = group.index.fetch_add(1, Ordering::Relaxed);
            if work_index >= group.max {
                // Post-increment hands the exact `max` value to exactly one
                // claimant; it signals completion, the rest are stragglers.
                first_at_max = work_index == group.max;
                break;
            }

            match &task.work {
                GroupWork::Native(f) => f(work_index),
                GroupWork::Callable(c) => {
                    report_call_error(task.id, &task.description, c.call(&[work_index]));
                }
            }
        }

        if task.low_priority && self.cfg.use_native_low_priority_threads {
            // The waiter joins the dedicated threads; only flag completion.
            if first_at_max {
                group.completed.store(true, Ordering::Release);
            }
        } else if first_at_max {
            group.completed.store(true, Ordering::Release);
            group.done.post();
        }

        // The record drops here; the group itself drops with its last
        // reference, wherever that is released.
    }
}

fn run_single(task: SingleTask) {
    match task.work {
        SingleWork::Native(f) => f(),
        SingleWork::Callable(c) => report_call_error(task.id, &task.description, c.call(&[])),
    }

    task.completion.completed.store(true, Ordering::Release);
    task.completion.done.post();
}

/// The error channel for scripted callbacks: record and move on, the work
/// item counts as completed.
fn report_call_error(id: TaskId, description: &str, res: Result<(), CallError>) {
    if let Err(err) = res {
        error!(task = %id, description, %err, "task callable reported an error");
    }
}
