//! The seam between the pool and the host's scripting layer.
//!
//! The pool never inspects a [`Callable`]; it only invokes it with zero
//! arguments (single tasks) or one work-index argument (group tasks) and
//! records the error when a call fails. How a callable binds to a scripted
//! function is the host's business.

/// Error reported by a scripted callback invocation.
///
/// A failing call does not abort the pool: the error is recorded on the
/// error channel and the work item is treated as completed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("script call failed: {0}")]
pub struct CallError(pub String);

/// An opaque, invocable value handed to the pool by the host.
///
/// Group tasks invoke the same callable from several threads concurrently,
/// so implementations must be `Send + Sync`.
pub trait Callable: Send + Sync + 'static {
    fn call(&self, args: &[u32]) -> Result<(), CallError>;
}

impl<F> Callable for F
where
    F: Fn(&[u32]) -> Result<(), CallError> + Send + Sync + 'static,
{
    fn call(&self, args: &[u32]) -> Result<(), CallError> {
        self(args)
    }
}
