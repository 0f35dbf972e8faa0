// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use negative_impl::negative_impl;

use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::future_cell::{self, Awaitable, Blocking, FutureCell};

/// What an arbitrary Rust `async` block/fn must look like to be driven by a [`Task`]: it yields
/// its result through the ordinary `std::future::Future` machinery, and "cancellation" surfaces
/// as an `Err(Error::Cancelled)` propagating out of whatever the computation awaited. See
/// `SPEC_FULL.md` §4.4.1.
pub trait Computation<T>: std::future::Future<Output = Result<T>> {}
impl<T, F: std::future::Future<Output = Result<T>>> Computation<T> for F {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Running,
    Done,
    Cancelled,
}

/// Type-erased view of a [`Task`], used for the loop's live-task set and current-task pointer.
///
/// This is the object-safe surface `EventLoop` needs; it knows nothing about the computation's
/// output type.
pub trait AnyTask {
    /// Records `future` as the one this task is currently suspended on, so that cancelling the
    /// task can attempt to cancel it. See `SPEC_FULL.md` §4.4.1.
    fn set_blocking(&self, future: Rc<dyn Blocking>);
    /// Requests cancellation. See [`Task::cancel`].
    fn cancel(&self) -> bool;
    /// Whether the task has completed (normally, with a failure, or cancelled).
    fn done(&self) -> bool;
    /// Whether the task completed via cancellation.
    fn cancelled(&self) -> bool;
}

struct TaskInner<T: 'static> {
    loop_handle: EventLoop,
    cell: FutureCell<T>,
    computation: RefCell<Option<Pin<Box<dyn std::future::Future<Output = Result<T>>>>>>,
    state: Cell<TaskState>,
    must_cancel: Cell<bool>,
    blocking: RefCell<Option<Rc<dyn Blocking>>>,
}

impl<T: Clone + 'static> AnyTask for TaskInner<T> {
    fn set_blocking(&self, future: Rc<dyn Blocking>) {
        *self.blocking.borrow_mut() = Some(future);
    }

    fn cancel(&self) -> bool {
        if self.cell.done() {
            return false;
        }
        let blocking = self.blocking.borrow_mut().take();
        if let Some(future) = blocking {
            if future.cancel_dyn() {
                tracing::trace!("task cancel propagated to its blocking future");
                return true;
            }
        }
        tracing::trace!("task force-cancel armed for next resume");
        self.must_cancel.set(true);
        true
    }

    fn done(&self) -> bool {
        self.cell.done()
    }

    fn cancelled(&self) -> bool {
        self.cell.cancelled()
    }
}

/// A Future-shaped driver for a suspendable computation (an `async` block or function returning
/// `Result<T, Error>`).
///
/// Constructing a `Task` registers it in its loop's live-task set (keeping it alive while
/// pending) and schedules its first resume as a `call_soon` callback. A `Task` exposes the same
/// observable surface as [`crate::Future`] except for `set_result`/`set_exception`: its result
/// is produced only by stepping the computation.
pub struct Task<T: 'static> {
    inner: Rc<TaskInner<T>>,
}

impl<T: Clone + 'static> Task<T> {
    /// Wraps `computation` in a `Task` bound to `event_loop`, registers it, and schedules its
    /// first resume.
    pub fn spawn(event_loop: EventLoop, computation: impl Computation<T> + 'static) -> Self {
        let inner = Rc::new(TaskInner {
            loop_handle: event_loop.clone(),
            cell: FutureCell::new(event_loop.clone()),
            computation: RefCell::new(Some(Box::pin(computation))),
            state: Cell::new(TaskState::Pending),
            must_cancel: Cell::new(false),
            blocking: RefCell::new(None),
        });

        let any_task: Rc<dyn AnyTask> = Rc::clone(&inner);
        event_loop.register_task(Rc::clone(&any_task));
        let weak_task = Rc::downgrade(&any_task);
        let dereg_loop = event_loop.clone();
        inner.cell.add_done_callback(Rc::new(move || {
            if let Some(task) = weak_task.upgrade() {
                dereg_loop.deregister_task(&task);
            }
        }));
        drop(any_task);

        let resume_inner = Rc::clone(&inner);
        event_loop.call_soon_boxed(move || resume(resume_inner));

        Self { inner }
    }

    /// See [`crate::Future::result`].
    pub fn result(&self) -> Result<T> {
        self.inner.cell.result()
    }

    /// See [`crate::Future::exception`].
    pub fn exception(&self) -> Result<Option<Error>> {
        self.inner.cell.exception()
    }

    /// See [`crate::Future::done`].
    pub fn done(&self) -> bool {
        self.inner.cell.done()
    }

    /// See [`crate::Future::cancelled`].
    pub fn cancelled(&self) -> bool {
        self.inner.cell.cancelled()
    }

    /// Requests cancellation of this task.
    ///
    /// If the task is not currently blocking on a future, arms a force-cancel flag so the next
    /// resume never polls the computation and instead transitions straight to cancelled. If it
    /// is blocking, attempts to cancel that future; if that future refuses (already done), arms
    /// the force-cancel flag instead. Returns `false` only if the task was already done.
    pub fn cancel(&self) -> bool {
        AnyTask::cancel(&*self.inner)
    }

    /// See [`crate::Future::add_done_callback`].
    pub fn add_done_callback(&self, callback: Rc<dyn Fn()>) {
        self.inner.cell.add_done_callback(callback);
    }

    /// See [`crate::Future::remove_done_callback`].
    pub fn remove_done_callback(&self, callback: &Rc<dyn Fn()>) -> usize {
        self.inner.cell.remove_done_callback(callback)
    }

    /// The loop this task was spawned on.
    pub fn get_loop(&self) -> &EventLoop {
        self.inner.loop_handle_ref()
    }

    /// A type-erased handle suitable for `EventLoop::current_task`/`all_tasks` comparisons.
    pub fn as_any_task(&self) -> Rc<dyn AnyTask> {
        Rc::clone(&self.inner) as Rc<dyn AnyTask>
    }
}

impl<T: 'static> TaskInner<T> {
    fn loop_handle_ref(&self) -> &EventLoop {
        &self.loop_handle
    }
}

impl<T: Clone + 'static> Awaitable<T> for Task<T> {
    fn done(&self) -> bool {
        Task::done(self)
    }

    fn result(&self) -> Result<T> {
        Task::result(self)
    }

    fn add_done_callback(&self, callback: Rc<dyn Fn()>) {
        Task::add_done_callback(self, callback);
    }
}

impl<T: Clone + 'static> Blocking for TaskInner<T> {
    fn cancel_dyn(&self) -> bool {
        AnyTask::cancel(self)
    }
}

impl<T: Clone + 'static> std::future::Future for Task<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The task's own `cell` is what an outside awaiter suspends on; driving the computation
        // forward happens independently, via `resume`, scheduled by the loop. If a computation
        // awaits a nested `Task<T>` and the outer task is then cancelled while blocked on it,
        // `blocking_target` lets cancellation reach this task's own `cancel` (§4.4.1), rather
        // than just marking its embedded future done out from under a still-running computation.
        let target = Rc::clone(&self.inner) as Rc<dyn Blocking>;
        future_cell::poll_cell(&self.inner.cell, target, cx)
    }
}

#[negative_impl]
impl<T> !Send for Task<T> {}
#[negative_impl]
impl<T> !Sync for Task<T> {}

/// Resumes `inner`'s computation one step, per `SPEC_FULL.md` §4.4.
fn resume<T: Clone + 'static>(inner: Rc<TaskInner<T>>) {
    let loop_handle = inner.loop_handle.clone();
    let self_as_any: Rc<dyn AnyTask> = Rc::clone(&inner);
    loop_handle.set_current_task(Some(self_as_any));
    inner.blocking.borrow_mut().take();
    inner.state.set(TaskState::Running);
    tracing::trace!("task resuming");

    if inner.must_cancel.take() {
        tracing::trace!("task force-cancelled without polling its computation");
        inner.computation.borrow_mut().take();
        inner.state.set(TaskState::Cancelled);
        inner.cell.cancel();
        loop_handle.set_current_task(None);
        return;
    }

    let poll_result = {
        let mut slot = inner.computation.borrow_mut();
        match slot.as_mut() {
            Some(future) => {
                let waker = make_waker(Rc::clone(&inner));
                let mut cx = Context::from_waker(&waker);
                Some(future.as_mut().poll(&mut cx))
            }
            None => None,
        }
    };

    match poll_result {
        None | Some(Poll::Pending) => {
            // Still suspended; `inner.blocking` was set (if at all) by whichever `Future<U>`
            // was polled inside the computation's own `.await`.
        }
        Some(Poll::Ready(Ok(value))) => {
            inner.computation.borrow_mut().take();
            inner.state.set(TaskState::Done);
            let _ = inner.cell.set_result(value);
        }
        Some(Poll::Ready(Err(Error::Cancelled))) => {
            inner.computation.borrow_mut().take();
            inner.state.set(TaskState::Cancelled);
            inner.cell.cancel();
        }
        Some(Poll::Ready(Err(error))) => {
            inner.computation.borrow_mut().take();
            inner.state.set(TaskState::Done);
            let _ = inner.cell.set_exception(error);
        }
    }

    loop_handle.set_current_task(None);
}

fn make_waker<T: Clone + 'static>(inner: Rc<TaskInner<T>>) -> Waker {
    let raw = RawWaker::new(Rc::into_raw(inner).cast(), vtable::<T>());
    // SAFETY: `vtable::<T>()` implements clone/wake/wake_by_ref/drop consistently with a pointer
    // produced by `Rc::into_raw` for this same `T`; see the vtable functions below. The waker
    // never leaves this thread (`Task<T>` is `!Send`), so the `Send + Sync` claim `Waker` makes
    // unconditionally is upheld by construction, not by the pointee's own thread-safety.
    unsafe { Waker::from_raw(raw) }
}

fn vtable<T: Clone + 'static>() -> &'static RawWakerVTable {
    &RawWakerVTable::new(
        clone_raw::<T>,
        wake_raw::<T>,
        wake_by_ref_raw::<T>,
        drop_raw::<T>,
    )
}

unsafe fn clone_raw<T: Clone + 'static>(data: *const ()) -> RawWaker {
    // SAFETY: `data` was produced by `Rc::into_raw::<TaskInner<T>>`; incrementing the strong
    // count here balances the implicit decrement performed by whichever vtable fn eventually
    // consumes this clone (`wake_raw` or `drop_raw`).
    unsafe {
        Rc::increment_strong_count(data.cast::<TaskInner<T>>());
    }
    RawWaker::new(data, vtable::<T>())
}

unsafe fn wake_raw<T: Clone + 'static>(data: *const ()) {
    // SAFETY: see `clone_raw`. This consumes the strong count the waker was holding.
    let inner = unsafe { Rc::from_raw(data.cast::<TaskInner<T>>()) };
    schedule_resume(inner);
}

unsafe fn wake_by_ref_raw<T: Clone + 'static>(data: *const ()) {
    // SAFETY: see `clone_raw`. Reconstructed without consuming the waker's strong count: the
    // `Rc` is forgotten again after use so the waker keeps its original reference.
    let inner = unsafe { Rc::from_raw(data.cast::<TaskInner<T>>()) };
    schedule_resume(Rc::clone(&inner));
    std::mem::forget(inner);
}

unsafe fn drop_raw<T: Clone + 'static>(data: *const ()) {
    // SAFETY: see `clone_raw`. Drops the strong count the waker was holding.
    drop(unsafe { Rc::from_raw(data.cast::<TaskInner<T>>()) });
}

fn schedule_resume<T: Clone + 'static>(inner: Rc<TaskInner<T>>) {
    let loop_handle = inner.loop_handle.clone();
    loop_handle.call_soon_boxed(move || resume(inner));
}

/// Wraps a non-`Future<T>` awaitable-adapter `computation` so it can be driven the same way any
/// other computation is (§4.5's "awaitable non-Future" case, which collapses into `spawn` once
/// the adapter itself is expressed as a `std::future::Future`).
pub fn spawn<T: Clone + 'static>(
    event_loop: EventLoop,
    computation: impl Computation<T> + 'static,
) -> Task<T> {
    Task::spawn(event_loop, computation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Future as TockFuture;

    #[test]
    fn run_until_complete_returns_computation_value() {
        let event_loop = EventLoop::new();
        let task = spawn(event_loop.clone(), async { Ok(42) });
        let result: Result<i32> = event_loop.run_until_complete(&task);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn run_until_complete_propagates_failure_s4() {
        let event_loop = EventLoop::new();
        let task: Task<i32> = spawn(event_loop.clone(), async {
            Err(Error::failed(DivideByZero))
        });
        let result = event_loop.run_until_complete(&task);
        assert!(matches!(result, Err(Error::Failed(_))));
    }

    #[test]
    fn cancel_blocking_task_cancels_inner_future_s5() {
        let event_loop = EventLoop::new();
        let inner_future = TockFuture::<i32>::new(event_loop.clone());
        let awaited = inner_future.clone();
        let task: Task<i32> = spawn(event_loop.clone(), async move { awaited.await });

        let task_for_cancel = task.as_any_task();
        event_loop
            .call_soon(move || {
                task_for_cancel.cancel();
            })
            .unwrap();

        let result = event_loop.run_until_complete(&task);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(inner_future.cancelled());
    }

    #[derive(Debug)]
    struct DivideByZero;
    impl std::fmt::Display for DivideByZero {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "attempt to divide by zero")
        }
    }
    impl std::error::Error for DivideByZero {}

    #[test]
    fn assert_not_send_or_sync() {
        static_assertions::assert_not_impl_any!(Task<i32>: Send, Sync);
    }
}
