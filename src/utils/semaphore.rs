use parking_lot::{Condvar, Mutex};

/// A counting semaphore over a mutex + condvar pair.
///
/// Workers park on `wait`; re-entrant waiters use `try_wait` so a blocked
/// worker can keep draining the ready queue instead of deadlocking the pool.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    count: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    /// Makes one permit available, waking a single waiter if any.
    pub(crate) fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.available.notify_one();
    }

    /// Blocks until a permit is available, then consumes it.
    pub(crate) fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Consumes a permit if one is immediately available.
    pub(crate) fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    assert_impl_all!(Semaphore: Send, Sync);

    #[test]
    fn try_wait_consumes_posted_permits() {
        let sem = Semaphore::default();
        assert!(!sem.try_wait());

        sem.post();
        sem.post();
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn wait_blocks_until_post() {
        let sem = Arc::new(Semaphore::default());

        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };

        // Give the waiter time to park before releasing it.
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        sem.post();
        waiter.join().unwrap();
        assert!(!sem.try_wait());
    }
}
