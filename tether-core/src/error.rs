//! Error types for the reactive core.

use thiserror::Error;

/// Errors raised by gated reactive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// The lifetime context owning the resource has been torn down.
    ///
    /// Raised by `get`, `set`, tracked evaluation and registration once the
    /// owning [`LifetimeContext`](crate::reactive::LifetimeContext) is disposed.
    #[error("lifetime context is already disposed")]
    ContextDisposed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;
