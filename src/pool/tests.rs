use super::*;
use crate::callable::{CallError, Callable};
use crate::errors::PoolError;
use anyhow::Result;
use parking_lot::Mutex;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

assert_impl_all!(WorkerPool: Send, Sync);
assert_impl_all!(PoolHandle: Send, Sync, Clone);

fn block_until(gate: &AtomicBool) {
    while !gate.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(1));
    }
}

fn callable(f: impl Fn(&[u32]) -> Result<(), CallError> + Send + Sync + 'static) -> Arc<dyn Callable> {
    Arc::new(f)
}

fn hit_counters(elements: u32) -> Arc<Vec<AtomicU32>> {
    Arc::new((0..elements).map(|_| AtomicU32::new(0)).collect())
}

#[test]
fn single_native_task_runs_and_reclaims_id() -> Result<()> {
    let pool = Builder::new()
        .worker_threads(2)
        .low_priority_ratio(0.5)
        .try_build()?;

    let counter = Arc::new(AtomicU32::new(0));
    let id = {
        let counter = Arc::clone(&counter);
        pool.add_native_task(
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
            },
            true,
            "inc",
        )
    };

    pool.wait_for_task_completion(id)?;
    assert_eq!(counter.load(Ordering::Relaxed), 1);

    // The wait reclaimed the id.
    assert_eq!(pool.is_task_completed(id), Err(PoolError::InvalidTask(id)));

    pool.finish();
    Ok(())
}

#[rstest]
#[case::worker_wide(100, -1)]
#[case::more_fanout_than_elements(3, 8)]
#[case::single_record(64, 1)]
#[case::square(7, 7)]
fn group_task_visits_every_index_exactly_once(
    #[case] elements: u32,
    #[case] fanout: i32,
) -> Result<()> {
    let pool = Builder::new().worker_threads(4).try_build()?;

    let hits = hit_counters(elements);
    let gid = {
        let hits = Arc::clone(&hits);
        pool.add_native_group_task(
            move |i| {
                hits[i as usize].fetch_add(1, Ordering::Relaxed);
            },
            elements,
            fanout,
            true,
            "fan",
        )?
    };

    pool.wait_for_group_task_completion(gid)?;
    assert_eq!(pool.is_group_task_completed(gid), Err(PoolError::InvalidGroup(gid)));

    // Joining the workers guarantees even straggler claims have retired.
    pool.finish();
    for hit in hits.iter() {
        assert_eq!(hit.load(Ordering::Relaxed), 1);
    }
    Ok(())
}

#[test]
fn low_priority_quota_leaves_workers_for_high_priority() -> Result<()> {
    // ratio 0.25 of 4 workers => exactly one low-priority slot.
    let pool = Builder::new()
        .worker_threads(4)
        .low_priority_ratio(0.25)
        .try_build()?;

    let gate = Arc::new(AtomicBool::new(false));
    let low_ids: Vec<_> = (0..3)
        .map(|i| {
            let gate = Arc::clone(&gate);
            pool.add_native_task(move || block_until(&gate), false, &format!("low-{i}"))
        })
        .collect();

    // One admitted against the quota, the other two deferred.
    {
        let handle = pool.handle();
        let state = handle.shared.state.lock();
        assert_eq!(state.low_priority_backlog.len(), 2);
    }

    // The high-priority task completes while all three lows are still gated.
    let high = pool.add_native_task(|| {}, true, "high");
    pool.wait_for_task_completion(high)?;
    for id in &low_ids {
        assert_eq!(pool.is_task_completed(*id), Ok(false));
    }

    gate.store(true, Ordering::Release);
    for id in low_ids {
        pool.wait_for_task_completion(id)?;
    }
    pool.finish();
    Ok(())
}

#[test]
fn native_low_priority_mode_keeps_workers_free() -> Result<()> {
    let pool = Builder::new()
        .worker_threads(2)
        .use_native_low_priority_threads(true)
        .try_build()?;

    let order = Arc::new(Mutex::new(Vec::new()));

    let low_ids: Vec<_> = (0..8)
        .map(|i| {
            let order = Arc::clone(&order);
            pool.add_native_task(
                move || {
                    thread::sleep(Duration::from_millis(100));
                    order.lock().push("low");
                },
                false,
                &format!("low-{i}"),
            )
        })
        .collect();

    let high_ids: Vec<_> = (0..2)
        .map(|i| {
            let order = Arc::clone(&order);
            pool.add_native_task(move || order.lock().push("high"), true, &format!("high-{i}"))
        })
        .collect();

    for id in high_ids {
        pool.wait_for_task_completion(id)?;
    }
    for id in low_ids {
        pool.wait_for_task_completion(id)?;
    }

    let order = order.lock();
    assert_eq!(
        &order[..2],
        &["high", "high"],
        "dedicated threads must never occupy the worker pool"
    );
    assert_eq!(order.len(), 10);

    pool.finish();
    Ok(())
}

#[test]
fn worker_waiting_on_child_keeps_the_pool_alive() -> Result<()> {
    // A single worker: if its wait blocked, the child could never run.
    let pool = Builder::new().worker_threads(1).try_build()?;

    let handle = pool.handle();
    let child_ran = Arc::new(AtomicBool::new(false));

    let parent = {
        let child_ran = Arc::clone(&child_ran);
        pool.add_native_task(
            move || {
                let flag = Arc::clone(&child_ran);
                let child = handle.add_native_task(
                    move || flag.store(true, Ordering::Release),
                    true,
                    "child",
                );
                handle.wait_for_task_completion(child).unwrap();
            },
            true,
            "parent",
        )
    };

    pool.wait_for_task_completion(parent)?;
    assert!(child_ran.load(Ordering::Acquire));

    pool.finish();
    Ok(())
}

#[test]
fn progress_when_every_worker_waits_on_a_child() -> Result<()> {
    let workers = 4;
    let pool = Builder::new().worker_threads(workers).try_build()?;

    let barrier = Arc::new(Barrier::new(workers));
    let parents: Vec<_> = (0..workers)
        .map(|i| {
            let handle = pool.handle();
            let barrier = Arc::clone(&barrier);
            pool.add_native_task(
                move || {
                    // Rendezvous: every worker is now inside a parent task.
                    barrier.wait();
                    let child = handle.add_native_task(|| {}, true, "child");
                    handle.wait_for_task_completion(child).unwrap();
                },
                true,
                &format!("parent-{i}"),
            )
        })
        .collect();

    for id in parents {
        pool.wait_for_task_completion(id)?;
    }
    pool.finish();
    Ok(())
}

#[test]
fn finish_drops_backlog_tasks() -> Result<()> {
    // Quota of 1: the second low-priority task lands on the backlog.
    let pool = Builder::new()
        .worker_threads(2)
        .low_priority_ratio(0.5)
        .try_build()?;

    let gate = Arc::new(AtomicBool::new(false));
    let _running = {
        let gate = Arc::clone(&gate);
        pool.add_native_task(move || block_until(&gate), false, "running-low")
    };

    let starved_ran = Arc::new(AtomicBool::new(false));
    let _starved = {
        let flag = Arc::clone(&starved_ran);
        pool.add_native_task(
            move || flag.store(true, Ordering::Release),
            false,
            "starved-low",
        )
    };

    let releaser = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            gate.store(true, Ordering::Release);
        })
    };

    pool.finish();
    releaser.join().unwrap();

    assert!(
        !starved_ran.load(Ordering::Acquire),
        "backlog tasks are dropped at shutdown, not executed"
    );
    Ok(())
}

#[test]
fn at_most_one_waiter_per_task() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;

    let gate = Arc::new(AtomicBool::new(false));
    let id = {
        let gate = Arc::clone(&gate);
        pool.add_native_task(move || block_until(&gate), true, "gated")
    };

    let first_waiter = {
        let handle = pool.handle();
        thread::spawn(move || handle.wait_for_task_completion(id))
    };

    // Spin until the first waiter has claimed the id.
    {
        let handle = pool.handle();
        loop {
            let claimed = {
                let state = handle.shared.state.lock();
                state.tasks.get(&id).is_some_and(|entry| entry.waiting)
            };
            if claimed {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    assert!(matches!(
        pool.wait_for_task_completion(id),
        Err(PoolError::ConcurrentWait { .. })
    ));

    gate.store(true, Ordering::Release);
    first_waiter.join().unwrap()?;

    assert_eq!(pool.is_task_completed(id), Err(PoolError::InvalidTask(id)));
    pool.finish();
    Ok(())
}

#[test]
fn unknown_ids_are_rejected() -> Result<()> {
    let pool = Builder::new().worker_threads(1).try_build()?;

    let id = pool.add_native_task(|| {}, true, "only");
    pool.wait_for_task_completion(id)?;

    assert_eq!(pool.is_task_completed(id), Err(PoolError::InvalidTask(id)));
    assert_eq!(
        pool.wait_for_task_completion(id),
        Err(PoolError::InvalidTask(id))
    );

    // Task ids are not group ids, even though they share the id space.
    assert_eq!(pool.is_group_task_completed(id), Err(PoolError::InvalidGroup(id)));
    assert_eq!(
        pool.wait_for_group_task_completion(id),
        Err(PoolError::InvalidGroup(id))
    );

    pool.finish();
    Ok(())
}

#[test]
fn invalid_group_arguments_do_not_allocate() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;

    assert!(matches!(
        pool.add_native_group_task(|_| {}, 0, -1, true, "no elements"),
        Err(PoolError::InvalidArgument(_))
    ));
    assert!(matches!(
        pool.add_native_group_task(|_| {}, 8, 0, true, "no fanout"),
        Err(PoolError::InvalidArgument(_))
    ));

    let handle = pool.handle();
    assert!(handle.shared.state.lock().groups.is_empty());

    pool.finish();
    Ok(())
}

#[test]
fn callable_tasks_report_errors_and_still_complete() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;

    let calls = Arc::new(AtomicU32::new(0));
    let ok = {
        let calls = Arc::clone(&calls);
        callable(move |args| {
            assert!(args.is_empty());
            calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    };
    let id = pool.add_task(ok, true, "scripted");
    pool.wait_for_task_completion(id)?;
    assert_eq!(calls.load(Ordering::Relaxed), 1);

    // A reported call error is recorded, not propagated: the task still
    // completes and the wait succeeds.
    let failing = callable(|_| Err(CallError("script raised".into())));
    let id = pool.add_task(failing, true, "failing");
    pool.wait_for_task_completion(id)?;

    pool.finish();
    Ok(())
}

#[test]
fn callable_group_receives_each_index() -> Result<()> {
    let pool = Builder::new().worker_threads(4).try_build()?;

    let hits = hit_counters(50);
    let scripted = {
        let hits = Arc::clone(&hits);
        callable(move |args| {
            hits[args[0] as usize].fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    };

    let gid = pool.add_group_task(scripted, 50, -1, true, "scripted fan")?;
    pool.wait_for_group_task_completion(gid)?;

    pool.finish();
    for hit in hits.iter() {
        assert_eq!(hit.load(Ordering::Relaxed), 1);
    }
    Ok(())
}

#[test]
fn low_priority_group_drains_through_backlog_promotion() -> Result<()> {
    // Quota of 1: one fan-out record admitted, three deferred. Finishing
    // records promote the backlog one-for-one until the group drains.
    let pool = Builder::new()
        .worker_threads(2)
        .low_priority_ratio(0.5)
        .try_build()?;

    let gate = Arc::new(AtomicBool::new(false));
    let hits = hit_counters(64);
    let gid = {
        let gate = Arc::clone(&gate);
        let hits = Arc::clone(&hits);
        pool.add_native_group_task(
            move |i| {
                block_until(&gate);
                hits[i as usize].fetch_add(1, Ordering::Relaxed);
            },
            64,
            4,
            false,
            "background fan",
        )?
    };

    {
        let handle = pool.handle();
        let state = handle.shared.state.lock();
        assert_eq!(state.low_priority_backlog.len(), 3);
    }

    gate.store(true, Ordering::Release);
    while !pool.is_group_task_completed(gid)? {
        thread::sleep(Duration::from_millis(1));
    }
    pool.wait_for_group_task_completion(gid)?;

    pool.finish();
    for hit in hits.iter() {
        assert_eq!(hit.load(Ordering::Relaxed), 1);
    }
    Ok(())
}

#[test]
fn dedicated_low_priority_group_is_joined_by_the_waiter() -> Result<()> {
    let pool = Builder::new()
        .worker_threads(2)
        .use_native_low_priority_threads(true)
        .try_build()?;

    let hits = hit_counters(32);
    let gid = {
        let hits = Arc::clone(&hits);
        pool.add_native_group_task(
            move |i| {
                hits[i as usize].fetch_add(1, Ordering::Relaxed);
            },
            32,
            3,
            false,
            "background fan",
        )?
    };

    pool.wait_for_group_task_completion(gid)?;

    // The wait joined every dedicated thread, so all claims have retired.
    for hit in hits.iter() {
        assert_eq!(hit.load(Ordering::Relaxed), 1);
    }
    assert_eq!(pool.is_group_task_completed(gid), Err(PoolError::InvalidGroup(gid)));

    pool.finish();
    Ok(())
}

#[test]
fn n_independent_tasks_all_run_exactly_once() -> Result<()> {
    let pool = Builder::new().worker_threads(4).try_build()?;

    let counter = Arc::new(AtomicU32::new(0));
    let ids: Vec<_> = (0..50)
        .map(|i| {
            let counter = Arc::clone(&counter);
            pool.add_native_task(
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                },
                i % 2 == 0,
                &format!("task-{i}"),
            )
        })
        .collect();

    for id in ids {
        pool.wait_for_task_completion(id)?;
    }
    assert_eq!(counter.load(Ordering::Relaxed), 50);

    pool.finish();
    Ok(())
}

#[test]
fn completion_is_observable_before_the_wait() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;

    let gate = Arc::new(AtomicBool::new(false));
    let id = {
        let gate = Arc::clone(&gate);
        pool.add_native_task(move || block_until(&gate), true, "gated")
    };

    assert_eq!(pool.is_task_completed(id), Ok(false));

    gate.store(true, Ordering::Release);
    while !pool.is_task_completed(id)? {
        thread::sleep(Duration::from_millis(1));
    }

    pool.wait_for_task_completion(id)?;
    pool.finish();
    Ok(())
}

#[test]
fn ids_are_unique_across_tasks_and_groups() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;

    let a = pool.add_native_task(|| {}, true, "a");
    let g = pool.add_native_group_task(|_| {}, 4, -1, true, "g")?;
    let b = pool.add_native_task(|| {}, true, "b");

    assert!(a < g && g < b, "tasks and groups share one monotonic id space");

    pool.wait_for_task_completion(a)?;
    pool.wait_for_task_completion(b)?;
    pool.wait_for_group_task_completion(g)?;
    pool.finish();
    Ok(())
}

#[test]
fn worker_threads_carry_the_configured_name() -> Result<()> {
    let pool = Builder::new()
        .worker_threads(1)
        .thread_name("millworker")
        .try_build()?;

    let seen = Arc::new(Mutex::new(None));
    let id = {
        let seen = Arc::clone(&seen);
        pool.add_native_task(
            move || *seen.lock() = thread::current().name().map(str::to_owned),
            true,
            "who am I",
        )
    };

    pool.wait_for_task_completion(id)?;
    assert_eq!(seen.lock().as_deref(), Some("millworker-0"));

    pool.finish();
    Ok(())
}

#[test]
fn finish_is_idempotent() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;
    pool.finish();
    pool.finish();
    // Drop runs it a third time.
    Ok(())
}

#[test]
fn global_pool_initializes_once() -> Result<()> {
    let handle = global::init(Builder::new().worker_threads(2))?;
    assert!(global::handle().is_some());
    assert!(matches!(
        global::init(Builder::new()),
        Err(PoolError::AlreadyInitialized)
    ));

    let id = handle.add_native_task(|| {}, true, "global task");
    handle.wait_for_task_completion(id)?;

    global::finish();
    assert!(global::handle().is_none());

    // Re-initialization after finish is allowed.
    global::init(Builder::new().worker_threads(1))?;
    global::finish();
    Ok(())
}
