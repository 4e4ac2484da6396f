use crate::errors::PoolError;
use crate::pool::WorkerPool;
use std::thread;

const DEFAULT_LOW_PRIORITY_RATIO: f32 = 0.3;

const DEFAULT_THREAD_NAME_PREFIX: &str = "taskmill";

/// Configures and starts a [`WorkerPool`].
///
/// ```no_run
/// use taskmill::Builder;
///
/// let pool = Builder::new()
///     .worker_threads(4)
///     .low_priority_ratio(0.25)
///     .try_build()
///     .unwrap();
/// # drop(pool);
/// ```
#[derive(Debug)]
pub struct Builder {
    /// The number of persistent worker threads.
    ///
    /// Defaults to one worker per CPU core.
    worker_threads: Option<usize>,

    /// When set, every low-priority submission runs on its own short-lived
    /// native thread and the worker pool serves high-priority work only.
    use_native_low_priority_threads: bool,

    /// Fraction of the pool that low-priority work may occupy, in `(0, 1]`.
    /// Only meaningful in cooperative mode.
    low_priority_ratio: f32,

    /// Prefix for worker thread names, `{prefix}-{index}`.
    thread_name_prefix: String,

    /// Stack size used for threads spawned by the pool.
    thread_stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            use_native_low_priority_threads: false,
            low_priority_ratio: DEFAULT_LOW_PRIORITY_RATIO,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_owned(),
            thread_stack_size: None,
        }
    }

    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// This function will panic if 0 is passed as an argument.
    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "Worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Selects the low-priority execution strategy: dedicated native threads
    /// instead of a share of the worker pool.
    pub fn use_native_low_priority_threads(mut self, val: bool) -> Self {
        self.use_native_low_priority_threads = val;
        self
    }

    /// Sets the fraction of workers that low-priority tasks may occupy at
    /// once. Must lie in `(0, 1]`; at least one worker slot is always
    /// granted.
    pub fn low_priority_ratio(mut self, val: f32) -> Self {
        self.low_priority_ratio = val;
        self
    }

    /// Sets the prefix used to name threads spawned by the pool.
    ///
    /// The default yields worker names `taskmill-{N}`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the stack size (in bytes) for worker threads.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// specifies a minimal stack size.
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Creates the configured `WorkerPool` and starts its worker threads.
    pub fn try_build(self) -> Result<WorkerPool, PoolError> {
        let cfg = self.try_into()?;
        Ok(WorkerPool::start(cfg))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

// Export the builder as a PoolConfig object to be consumed by the shared
// pool state and the worker threads.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    pub(crate) worker_threads: usize,
    pub(crate) use_native_low_priority_threads: bool,
    pub(crate) max_low_priority_threads: u32,
    pub(crate) thread_name_prefix: String,
    pub(crate) thread_stack_size: Option<usize>,
}

impl TryFrom<Builder> for PoolConfig {
    type Error = PoolError;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        if !(builder.low_priority_ratio > 0.0 && builder.low_priority_ratio <= 1.0) {
            return Err(PoolError::InvalidArgument(
                "low_priority_ratio must lie in (0, 1]",
            ));
        }

        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism().map_or(1, usize::from),
        };

        // In native mode the whole pool is reserved for high-priority work.
        let max_low_priority_threads = if builder.use_native_low_priority_threads {
            0
        } else {
            let share = (worker_threads as f32 * builder.low_priority_ratio).round() as u32;
            share.clamp(1, worker_threads as u32)
        };

        Ok(PoolConfig {
            worker_threads,
            use_native_low_priority_threads: builder.use_native_low_priority_threads,
            max_low_priority_threads,
            thread_name_prefix: builder.thread_name_prefix,
            thread_stack_size: builder.thread_stack_size,
        })
    }
}
