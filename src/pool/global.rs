//! The process-wide singleton layer.
//!
//! Hosts that want one pool for the whole process initialize it here once at
//! startup and tear it down once at exit; everything in between goes through
//! [`handle`]. Embedders that prefer explicit ownership can skip this module
//! entirely and hold a [`WorkerPool`] themselves.

use crate::errors::PoolError;
use crate::pool::{Builder, PoolHandle, WorkerPool};
use parking_lot::Mutex;

static GLOBAL: Mutex<Option<WorkerPool>> = Mutex::new(None);

/// Builds the process-wide pool. Fails with `AlreadyInitialized` if a pool
/// is already running; call [`finish`] first to replace it.
pub fn init(builder: Builder) -> Result<PoolHandle, PoolError> {
    let mut slot = GLOBAL.lock();
    if slot.is_some() {
        return Err(PoolError::AlreadyInitialized);
    }

    let pool = builder.try_build()?;
    let handle = pool.handle();
    *slot = Some(pool);
    Ok(handle)
}

/// Returns a handle to the process-wide pool, if one is running.
pub fn handle() -> Option<PoolHandle> {
    GLOBAL.lock().as_ref().map(WorkerPool::handle)
}

/// Tears the process-wide pool down, joining every worker. A no-op when no
/// pool is running.
pub fn finish() {
    let pool = GLOBAL.lock().take();
    if let Some(pool) = pool {
        pool.finish();
    }
}
