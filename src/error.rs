// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use thiserror::Error;

/// A specialized `Result` type for runtime operations that return a `tock`
/// [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the runtime.
///
/// This is a closed taxonomy of the failure kinds the loop, future, and task layers can produce.
/// It is not an umbrella type for arbitrary computation failures: those are carried in the
/// [`Error::Failed`] variant, which wraps whatever `std::error::Error` a computation returned.
///
/// `Error` is `Clone` because a done [`crate::Future`]'s stored failure must be re-readable from
/// repeated calls to `result()`/`exception()`, not just handed out once.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// `result`/`exception`/`set_result`/`set_exception` was called at the wrong stage of a
    /// future's lifecycle, or an operation was awaited on a future bound to a closed loop.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The awaited operation was cancelled. Raised into computations to signal cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// `spawn`/`run` was handed something that cannot be driven as a computation, or a task's
    /// computation yielded a value that was not one of this crate's own futures.
    #[error("type error: {0}")]
    TypeError(&'static str),

    /// Scheduling or running on a closed loop; closing a running loop; `run_until_complete`
    /// returned before its future completed; `get_running_loop` called with no running loop.
    #[error("runtime error: {0}")]
    RuntimeError(&'static str),

    /// A computation failed with an arbitrary error that is not itself part of this crate's
    /// taxonomy (for example, a division by zero inside a computation).
    #[error(transparent)]
    Failed(#[from] Rc<dyn std::error::Error>),
}

impl Error {
    /// Wraps an arbitrary computation failure that is not itself part of this crate's taxonomy.
    pub fn failed(err: impl std::error::Error + 'static) -> Self {
        Self::Failed(Rc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            Error::InvalidState("future is not done").to_string(),
            "invalid state: future is not done"
        );
        assert_eq!(Error::Cancelled.to_string(), "operation cancelled");
        assert_eq!(
            Error::TypeError("not a computation").to_string(),
            "type error: not a computation"
        );
        assert_eq!(
            Error::RuntimeError("loop is closed").to_string(),
            "runtime error: loop is closed"
        );
    }

    #[test]
    fn failed_wraps_arbitrary_error() {
        let err = Error::failed(std::fmt::Error);
        assert!(matches!(err, Error::Failed(_)));
    }

    #[test]
    fn clone_preserves_variant() {
        let err = Error::Cancelled;
        let cloned = err.clone();
        assert!(matches!(cloned, Error::Cancelled));
    }
}
