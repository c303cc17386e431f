//! Function-shaped capabilities the engine drives.
//!
//! The engine depends only on these traits, never on a resource type. Plain
//! closures returning futures implement both, so call sites supply their
//! fetch-and-compare logic inline.

use std::future::Future;
use std::pin::Pin;

use crate::error::OperationError;

/// Boxed future returned by [`Operation::run`].
pub type OperationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), OperationError>> + Send + 'a>>;

/// Boxed future returned by [`Probe::check`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, OperationError>> + Send + 'a>>;

/// A unit of work that either succeeds or fails with an error.
///
/// Operations run under the retry executor must be safe to re-run.
pub trait Operation: Send + Sync {
    /// Perform the work once.
    fn run(&self) -> OperationFuture<'_>;
}

impl<F, Fut> Operation for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    fn run(&self) -> OperationFuture<'_> {
        Box::pin(self())
    }
}

/// Reports whether a condition currently holds.
///
/// `Ok(false)` means "not yet"; an `Err` is terminal and stops polling. The
/// probe decides which observed errors are worth swallowing.
pub trait Probe: Send + Sync {
    /// Evaluate the condition once.
    fn check(&self) -> ProbeFuture<'_>;
}

impl<F, Fut> Probe for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, OperationError>> + Send + 'static,
{
    fn check(&self) -> ProbeFuture<'_> {
        Box::pin(self())
    }
}
