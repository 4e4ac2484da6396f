pub(crate) mod semaphore;

pub(crate) use semaphore::Semaphore;
