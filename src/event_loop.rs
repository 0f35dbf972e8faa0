// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::{Cell, RefCell};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use negative_impl::negative_impl;

use crate::error::{Error, Result};
use crate::future_cell::Awaitable;
use crate::handle::{Handle, TimerHandle};
use crate::scheduled::{BoxedCallback, Level, ScheduledCallback};
use crate::task::AnyTask;

/// How long `run_forever` sleeps between ticks when nothing is scheduled.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Context passed to the exception handler for a failure surfaced during a drained callback.
///
/// Mirrors the source's `loop.call_exception_handler(context)`, where `context` carries a
/// human-readable message plus the originating failure.
#[derive(Debug)]
pub struct ExceptionContext {
    /// A human-readable description of what failed.
    pub message: String,
}

type ExceptionHandler = Box<dyn FnMut(&EventLoop, &ExceptionContext)>;

fn default_exception_handler(_loop: &EventLoop, context: &ExceptionContext) {
    tracing::warn!("Exception in callback: {}", context.message);
}

struct EventLoopInner {
    epoch: Instant,
    queue: RefCell<BinaryHeap<ScheduledCallback>>,
    next_index: Cell<u64>,
    running: Cell<bool>,
    closed: Cell<bool>,
    current_task: RefCell<Option<Rc<dyn AnyTask>>>,
    tasks: RefCell<Vec<Rc<dyn AnyTask>>>,
    exception_handler: RefCell<ExceptionHandler>,
}

/// A time-ordered callback scheduler: the single-threaded driver underneath [`crate::Future`]
/// and [`crate::Task`].
///
/// Cloning an `EventLoop` shares the same underlying queue and flags (it is a thin `Rc` handle),
/// matching the way this crate's other public types are cheap, reference-counted handles.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<EventLoopInner>,
}

impl EventLoop {
    /// Creates a fresh, not-yet-running loop with an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EventLoopInner {
                epoch: Instant::now(),
                queue: RefCell::new(BinaryHeap::new()),
                next_index: Cell::new(0),
                running: Cell::new(false),
                closed: Cell::new(false),
                current_task: RefCell::new(None),
                tasks: RefCell::new(Vec::new()),
                exception_handler: RefCell::new(Box::new(default_exception_handler)),
            }),
        }
    }

    /// Monotonic seconds since this loop was created. Non-decreasing across calls.
    pub fn time(&self) -> f64 {
        self.inner.epoch.elapsed().as_secs_f64()
    }

    /// Schedules `callback` to run as soon as the loop next drains, in FIFO order relative to
    /// other `call_soon` calls made before it.
    pub fn call_soon<F: FnOnce() + 'static>(&self, callback: F) -> Result<Handle> {
        self.ensure_open()?;
        let when = self.time();
        Ok(self.enqueue(Level::Soon, when, Box::new(callback)).0)
    }

    /// Equivalent to `call_at(time() + delay, callback)`. Negative delays fire as soon as
    /// possible (on the next tick).
    pub fn call_later<F: FnOnce() + 'static>(
        &self,
        delay: f64,
        callback: F,
    ) -> Result<TimerHandle> {
        self.call_at(self.time() + delay, callback)
    }

    /// Schedules `callback` to run once the loop's time reaches the absolute instant `when`.
    pub fn call_at<F: FnOnce() + 'static>(&self, when: f64, callback: F) -> Result<TimerHandle> {
        self.ensure_open()?;
        let (_, timer_handle) = self.enqueue(Level::Delayed, when, Box::new(callback));
        Ok(timer_handle.expect("delayed entries always produce a timer handle"))
    }

    fn enqueue(
        &self,
        level: Level,
        when: f64,
        callback: BoxedCallback,
    ) -> (Handle, Option<TimerHandle>) {
        let index = self.inner.next_index.get();
        self.inner.next_index.set(index + 1);

        let (handle, timer_handle, cancelled) = match level {
            Level::Soon => {
                let (handle, cancelled) = Handle::new();
                (handle, None, cancelled)
            }
            Level::Delayed => {
                let (timer_handle, cancelled) = TimerHandle::new(when);
                (timer_handle.clone_handle(), Some(timer_handle), cancelled)
            }
        };

        self.inner.queue.borrow_mut().push(ScheduledCallback {
            level,
            when,
            index,
            cancelled,
            callback,
        });

        (handle, timer_handle)
    }

    pub(crate) fn call_soon_boxed(&self, callback: impl FnOnce() + 'static) {
        // Used internally (future completion callbacks, task resumes) where the loop is known to
        // still be open because the caller already holds a live Future/Task on it. Scheduling
        // here never fails in practice; a closed loop simply means the callback is dropped.
        let _ = self.call_soon(callback);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.get() {
            return Err(Error::RuntimeError("event loop is closed"));
        }
        Ok(())
    }

    /// Runs one promote-then-drain tick, assuming the caller already wants work done regardless
    /// of `running`. Used by `run_forever` and, for tests, to deterministically flush due
    /// callbacks without a `stop()` dance.
    fn tick(&self) {
        let sleep_for = {
            let queue = self.inner.queue.borrow();
            match queue.peek() {
                None => IDLE_SLEEP,
                Some(head) => Duration::from_secs_f64((head.when - self.time()).max(0.0)),
            }
        };
        if !sleep_for.is_zero() {
            std::thread::sleep(sleep_for);
        }

        let now = self.time();
        let mut pending = Vec::new();
        {
            let mut queue = self.inner.queue.borrow_mut();
            while let Some(head) = queue.peek() {
                let due = matches!(head.level, Level::Soon) || head.when <= now;
                if !due {
                    break;
                }
                pending.push(queue.pop().expect("just peeked"));
            }
        }

        tracing::trace!(count = pending.len(), "promoted callbacks for this tick");

        for entry in pending {
            if entry.is_cancelled() {
                continue;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(entry.callback));
            if let Err(payload) = result {
                let message = panic_message(&*payload);
                self.call_exception_handler(&ExceptionContext { message });
            }
        }
    }

    /// Test-only helper: runs exactly one tick without requiring `running`/`stop`. Not part of
    /// the public surface; production callers drive the loop via `run_forever`.
    #[cfg(test)]
    pub(crate) fn run_until_due(&self) {
        self.tick();
    }

    fn call_exception_handler(&self, context: &ExceptionContext) {
        let mut handler = self.inner.exception_handler.borrow_mut();
        handler(self, context);
    }

    /// Drains due callbacks until [`Self::stop`] is called.
    pub fn run_forever(&self) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!("event loop starting");
        self.inner.running.set(true);
        while self.inner.running.get() {
            self.tick();
        }
        tracing::debug!("event loop stopped");
        Ok(())
    }

    /// Drains all currently-due callbacks once more, then clears `running`.
    ///
    /// Scheduled as a `call_soon` callback, a queued `stop()` still lets any other already-due
    /// `soon` callback in the same tick run before the loop exits, because promotion already
    /// happened for this tick before `stop()`'s own entry executes.
    pub fn stop(&self) {
        tracing::debug!("event loop stop requested");
        self.inner.running.set(false);
    }

    /// Wraps `awaitable` (a [`crate::Future`] or [`crate::Task`]) so that it stops the loop once
    /// done, drives the loop to completion, and returns its result.
    ///
    /// Fails with [`Error::RuntimeError`] if `run_forever` returns without `awaitable` having
    /// completed (which should not happen in normal use, since the done callback stops the loop
    /// as soon as it completes).
    pub fn run_until_complete<T: Clone + 'static>(
        &self,
        awaitable: &impl Awaitable<T>,
    ) -> Result<T> {
        self.ensure_open()?;
        let loop_clone = self.clone();
        awaitable.add_done_callback(Rc::new(move || loop_clone.stop()));
        self.run_forever()?;
        if !awaitable.done() {
            return Err(Error::RuntimeError(
                "run_until_complete returned before its future completed",
            ));
        }
        awaitable.result()
    }

    /// Rejects if the loop is currently running; otherwise marks it closed. A closed loop
    /// rejects every scheduling and running entrypoint.
    pub fn close(&self) -> Result<()> {
        if self.inner.running.get() {
            return Err(Error::RuntimeError("cannot close a running event loop"));
        }
        self.inner.closed.set(true);
        tracing::debug!("event loop closed");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Installs a new exception handler, replacing the default logging handler.
    pub fn set_exception_handler(
        &self,
        handler: impl FnMut(&EventLoop, &ExceptionContext) + 'static,
    ) {
        *self.inner.exception_handler.borrow_mut() = Box::new(handler);
    }

    /// The task currently being resumed on this loop, if any.
    pub fn current_task(&self) -> Option<Rc<dyn AnyTask>> {
        self.inner.current_task.borrow().clone()
    }

    pub(crate) fn set_current_task(&self, task: Option<Rc<dyn AnyTask>>) {
        *self.inner.current_task.borrow_mut() = task;
    }

    /// A snapshot of every not-yet-done task registered on this loop.
    pub fn all_tasks(&self) -> Vec<Rc<dyn AnyTask>> {
        self.inner.tasks.borrow().clone()
    }

    pub(crate) fn register_task(&self, task: Rc<dyn AnyTask>) {
        self.inner.tasks.borrow_mut().push(task);
    }

    pub(crate) fn deregister_task(&self, task: &Rc<dyn AnyTask>) {
        self.inner
            .tasks
            .borrow_mut()
            .retain(|existing| !Rc::ptr_eq(existing, task));
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[negative_impl]
impl !Send for EventLoop {}
#[negative_impl]
impl !Sync for EventLoop {}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked with a non-string payload".to_string()
    }
}
