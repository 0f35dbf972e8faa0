// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::Cell;
use std::rc::Rc;

use negative_impl::negative_impl;

/// An opaque cancellation token for one callback scheduled on an [`crate::EventLoop`].
///
/// Cancelling is idempotent and cheap: it flips a shared bit rather than touching the loop's
/// queue. The queue still pops the underlying entry in its turn; the drain step simply skips it.
#[derive(Debug, Clone)]
pub struct Handle {
    cancelled: Rc<Cell<bool>>,
}

impl Handle {
    pub(crate) fn new() -> (Self, Rc<Cell<bool>>) {
        let cancelled = Rc::new(Cell::new(false));
        (
            Self {
                cancelled: Rc::clone(&cancelled),
            },
            cancelled,
        )
    }

    /// Cancels the scheduled callback this handle refers to.
    ///
    /// Has no effect if already cancelled or if the callback has already been drained.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Reports whether [`Self::cancel`] has been called.
    pub fn cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

#[negative_impl]
impl !Send for Handle {}
#[negative_impl]
impl !Sync for Handle {}

/// A [`Handle`] for a callback scheduled with an absolute fire time (`call_later`/`call_at`).
///
/// In addition to everything a `Handle` can do, it exposes the immutable scheduled time.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    handle: Handle,
    when: f64,
}

impl TimerHandle {
    pub(crate) fn new(when: f64) -> (Self, Rc<Cell<bool>>) {
        let (handle, cancelled) = Handle::new();
        (Self { handle, when }, cancelled)
    }

    /// Cancels the scheduled callback this handle refers to.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Reports whether [`Self::cancel`] has been called.
    pub fn cancelled(&self) -> bool {
        self.handle.cancelled()
    }

    /// The absolute monotonic time, in seconds, at which this callback is scheduled to fire.
    pub fn when(&self) -> f64 {
        self.when
    }

    pub(crate) fn clone_handle(&self) -> Handle {
        self.handle.clone()
    }
}

#[negative_impl]
impl !Send for TimerHandle {}
#[negative_impl]
impl !Sync for TimerHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let (handle, flag) = Handle::new();
        assert!(!handle.cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.cancelled());
        assert!(flag.get());
    }

    #[test]
    fn clones_share_the_same_flag() {
        let (handle, _flag) = Handle::new();
        let other = handle.clone();
        other.cancel();
        assert!(handle.cancelled());
    }

    #[test]
    fn timer_handle_exposes_when() {
        let (handle, _flag) = TimerHandle::new(12.5);
        assert_eq!(handle.when(), 12.5);
        assert!(!handle.cancelled());
        handle.cancel();
        assert!(handle.cancelled());
    }

    #[test]
    fn assert_not_send_or_sync() {
        static_assertions::assert_not_impl_any!(Handle: Send, Sync);
        static_assertions::assert_not_impl_any!(TimerHandle: Send, Sync);
    }
}
