// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The single-assignment result cell shared by [`crate::Future`] and [`crate::Task`].
//!
//! Both public types are a thin wrapper around `Rc<FutureCell<T>>`; this module holds the one
//! implementation of "done at most once, notify completion callbacks through the loop, and also
//! answer `std::future::Future::poll`" that both of them need.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::Error;
use crate::event_loop::EventLoop;

type DoneCallback = Rc<dyn Fn()>;

/// Type-erased handle used by a [`crate::Task`] to remember "the Future I am currently blocking
/// on," so that `Task::cancel` can attempt to cancel it without the computation exposing it
/// explicitly. See `SPEC_FULL.md` §4.4.1.
pub(crate) trait Blocking {
    fn cancel_dyn(&self) -> bool;
}

impl<T: Clone + 'static> Blocking for FutureCell<T> {
    fn cancel_dyn(&self) -> bool {
        self.cancel()
    }
}

pub(crate) struct FutureCell<T> {
    loop_handle: EventLoop,
    done: Cell<bool>,
    cancelled: Cell<bool>,
    value: RefCell<Option<T>>,
    failure: RefCell<Option<Error>>,
    callbacks: RefCell<Vec<DoneCallback>>,
    poll_waker: RefCell<Option<Waker>>,
}

impl<T: Clone + 'static> FutureCell<T> {
    pub(crate) fn new(loop_handle: EventLoop) -> Self {
        Self {
            loop_handle,
            done: Cell::new(false),
            cancelled: Cell::new(false),
            value: RefCell::new(None),
            failure: RefCell::new(None),
            callbacks: RefCell::new(Vec::new()),
            poll_waker: RefCell::new(None),
        }
    }

    pub(crate) fn get_loop(&self) -> &EventLoop {
        &self.loop_handle
    }

    pub(crate) fn done(&self) -> bool {
        self.done.get()
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancelled.get()
    }

    pub(crate) fn result(&self) -> Result<T, Error> {
        if !self.done.get() {
            return Err(Error::InvalidState("future is not done"));
        }
        if let Some(failure) = self.failure.borrow().as_ref() {
            return Err(failure.clone());
        }
        Ok(self
            .value
            .borrow()
            .clone()
            .expect("done future without a failure must have a value"))
    }

    pub(crate) fn exception(&self) -> Result<Option<Error>, Error> {
        if !self.done.get() {
            return Err(Error::InvalidState("future is not done"));
        }
        Ok(self.failure.borrow().clone())
    }

    pub(crate) fn set_result(&self, value: T) -> Result<(), Error> {
        if self.done.get() {
            return Err(Error::InvalidState("future is already done"));
        }
        *self.value.borrow_mut() = Some(value);
        self.done.set(true);
        tracing::trace!("future resolved with a value");
        self.wake_and_schedule();
        Ok(())
    }

    pub(crate) fn set_exception(&self, error: Error) -> Result<(), Error> {
        if self.done.get() {
            return Err(Error::InvalidState("future is already done"));
        }
        *self.failure.borrow_mut() = Some(error);
        self.done.set(true);
        tracing::trace!("future resolved with a failure");
        self.wake_and_schedule();
        Ok(())
    }

    pub(crate) fn cancel(&self) -> bool {
        if self.done.get() {
            return false;
        }
        *self.failure.borrow_mut() = Some(Error::Cancelled);
        self.done.set(true);
        self.cancelled.set(true);
        tracing::trace!("future cancelled");
        self.wake_and_schedule();
        true
    }

    pub(crate) fn add_done_callback(&self, callback: DoneCallback) {
        if self.done.get() {
            self.loop_handle.call_soon_boxed(move || callback());
            return;
        }
        self.callbacks.borrow_mut().push(callback);
    }

    pub(crate) fn remove_done_callback(&self, callback: &DoneCallback) -> usize {
        let mut callbacks = self.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|existing| !Rc::ptr_eq(existing, callback));
        before - callbacks.len()
    }

    fn wake_and_schedule(&self) {
        if let Some(waker) = self.poll_waker.borrow_mut().take() {
            waker.wake();
        }
        for callback in self.callbacks.borrow_mut().drain(..) {
            self.loop_handle.call_soon_boxed(move || callback());
        }
    }
}

/// Common surface shared by [`crate::Future`] and [`crate::Task`]: something that eventually
/// produces a `T` or a failure, and that can be awaited for completion.
///
/// `run_until_complete` is generic over this trait so it can drive either a bare `Future<T>` or
/// a spawned `Task<T>` to completion.
pub trait Awaitable<T> {
    /// Whether this value has completed (successfully, with a failure, or cancelled).
    fn done(&self) -> bool;
    /// The produced value, or the stored failure. `Err(Error::InvalidState)` if not done.
    fn result(&self) -> Result<T, Error>;
    /// Registers a callback to run (via the owning loop) once this value completes.
    fn add_done_callback(&self, callback: Rc<dyn Fn()>);
}

/// Polls a cell on behalf of the public `Future<T>`/`Task<T>` wrappers.
///
/// `blocking_target` is whatever the current task should remember as "the thing I'm waiting on"
/// (§4.4.1) if it later gets cancelled while suspended here — the cell's own `Rc` for a bare
/// `Future<T>`, or the owning `Rc<TaskInner<T>>` when a computation awaits a nested `Task<T>`.
pub(crate) fn poll_cell<T: Clone + 'static>(
    cell: &FutureCell<T>,
    blocking_target: Rc<dyn Blocking>,
    cx: &mut Context<'_>,
) -> Poll<Result<T, Error>> {
    if let Some(task) = cell.loop_handle.current_task() {
        task.set_blocking(blocking_target);
    }
    if cell.done() {
        return Poll::Ready(cell.result());
    }
    *cell.poll_waker.borrow_mut() = Some(cx.waker().clone());
    Poll::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;

    fn cell() -> FutureCell<i32> {
        FutureCell::new(EventLoop::new())
    }

    #[test]
    fn set_result_then_result_roundtrips() {
        let c = cell();
        c.set_result(9).unwrap();
        assert_eq!(c.result().unwrap(), 9);
        assert!(c.done());
        assert!(!c.cancelled());
    }

    #[test]
    fn double_set_result_is_invalid_state() {
        let c = cell();
        c.set_result(1).unwrap();
        assert!(matches!(c.set_result(2), Err(Error::InvalidState(_))));
    }

    #[test]
    fn result_before_done_is_invalid_state() {
        let c = cell();
        assert!(matches!(c.result(), Err(Error::InvalidState(_))));
        assert!(matches!(c.exception(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn cancel_pending_future() {
        let c = cell();
        assert!(c.cancel());
        assert!(c.done());
        assert!(c.cancelled());
        assert!(matches!(c.result(), Err(Error::Cancelled)));
    }

    #[test]
    fn cancel_done_future_is_noop() {
        let c = cell();
        c.set_result(1).unwrap();
        assert!(!c.cancel());
        assert!(!c.cancelled());
        assert_eq!(c.result().unwrap(), 1);
    }

    #[test]
    fn done_callback_fires_once_scheduled() {
        let c = Rc::new(cell());
        let fired = Rc::new(Cell::new(false));
        let fired_clone = Rc::clone(&fired);
        c.add_done_callback(Rc::new(move || fired_clone.set(true)));
        c.set_result(1).unwrap();
        assert!(!fired.get(), "callback must be scheduled, not invoked synchronously");
        c.get_loop().run_until_due();
        assert!(fired.get());
    }

    #[test]
    fn add_done_callback_after_done_still_schedules() {
        let c = cell();
        c.set_result(1).unwrap();
        let fired = Rc::new(Cell::new(false));
        let fired_clone = Rc::clone(&fired);
        c.add_done_callback(Rc::new(move || fired_clone.set(true)));
        assert!(!fired.get());
        c.get_loop().run_until_due();
        assert!(fired.get());
    }

    #[test]
    fn remove_done_callback_removes_all_matching() {
        let c = cell();
        let calls = Rc::new(Cell::new(0));
        let calls_clone = Rc::clone(&calls);
        let cb: DoneCallback = Rc::new(move || calls_clone.set(calls_clone.get() + 1));
        c.add_done_callback(Rc::clone(&cb));
        c.add_done_callback(Rc::clone(&cb));
        let removed = c.remove_done_callback(&cb);
        assert_eq!(removed, 2);
        c.set_result(1).unwrap();
        c.get_loop().run_until_due();
        assert_eq!(calls.get(), 0);
    }
}
