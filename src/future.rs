// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use negative_impl::negative_impl;

use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::future_cell::{self, Awaitable, FutureCell};

/// A single-assignment result cell: settable once, observable many times.
///
/// A `Future<T>` transitions from pending to done at most once. Once done, [`Self::result`] and
/// [`Self::exception`] never fail; before done they always fail with
/// [`Error::InvalidState`]. Awaiting a `Future<T>` directly (via `.await`, since it implements
/// `std::future::Future`) yields its result once it resolves, propagating a stored failure
/// through the `?` operator the same way `result()` does.
///
/// Cloning shares the same underlying cell: both clones observe the same completion.
#[derive(Clone)]
pub struct Future<T> {
    cell: Rc<FutureCell<T>>,
}

impl<T: Clone + 'static> Future<T> {
    /// Creates a new pending future bound to `event_loop`.
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            cell: Rc::new(FutureCell::new(event_loop)),
        }
    }

    /// Creates a new pending future bound to the ambient current loop
    /// (see [`crate::get_event_loop`]).
    pub fn new_on_current_loop() -> Result<Self> {
        Ok(Self::new(crate::context::get_event_loop()?))
    }

    /// Returns the stored value, or raises the stored failure. Fails with
    /// [`Error::InvalidState`] if not yet done.
    pub fn result(&self) -> Result<T> {
        self.cell.result()
    }

    /// Sets the result to `value`. Fails with [`Error::InvalidState`] if already done.
    pub fn set_result(&self, value: T) -> Result<()> {
        self.cell.set_result(value)
    }

    /// Returns the stored failure, or `None` if resolved with a value. Fails with
    /// [`Error::InvalidState`] if not yet done.
    pub fn exception(&self) -> Result<Option<Error>> {
        self.cell.exception()
    }

    /// Sets the failure to `error`. Fails with [`Error::InvalidState`] if already done.
    pub fn set_exception(&self, error: Error) -> Result<()> {
        self.cell.set_exception(error)
    }

    /// Whether this future has completed (with a value, a failure, or cancellation).
    pub fn done(&self) -> bool {
        self.cell.done()
    }

    /// Whether this future was cancelled via [`Self::cancel`].
    pub fn cancelled(&self) -> bool {
        self.cell.cancelled()
    }

    /// Cancels this future: sets its failure to [`Error::Cancelled`] and marks it done and
    /// cancelled. Returns `false` without effect if already done.
    pub fn cancel(&self) -> bool {
        self.cell.cancel()
    }

    /// Registers `callback` to run via the owning loop once this future completes. If already
    /// done, the callback is scheduled immediately (never invoked synchronously from here).
    pub fn add_done_callback(&self, callback: Rc<dyn Fn()>) {
        self.cell.add_done_callback(callback);
    }

    /// Removes every registered callback equal (by reference identity) to `callback`, returning
    /// how many were removed.
    pub fn remove_done_callback(&self, callback: &Rc<dyn Fn()>) -> usize {
        self.cell.remove_done_callback(callback)
    }

    /// The loop this future was created on.
    pub fn get_loop(&self) -> &EventLoop {
        self.cell.get_loop()
    }
}

impl<T: Clone + 'static> Awaitable<T> for Future<T> {
    fn done(&self) -> bool {
        Future::done(self)
    }

    fn result(&self) -> Result<T> {
        Future::result(self)
    }

    fn add_done_callback(&self, callback: Rc<dyn Fn()>) {
        Future::add_done_callback(self, callback);
    }
}

impl<T: Clone + 'static> std::future::Future for Future<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let target = Rc::clone(&self.cell) as Rc<dyn future_cell::Blocking>;
        future_cell::poll_cell(&self.cell, target, cx)
    }
}

#[negative_impl]
impl<T> !Send for Future<T> {}
#[negative_impl]
impl<T> !Sync for Future<T> {}
