// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(
    test,
    allow(
        clippy::arithmetic_side_effects,
        reason = "allow these lints in tests to improve the readability of the tests"
    )
)]

//! A minimal, single-threaded cooperative concurrency runtime: a time-ordered callback
//! scheduler, a single-assignment future, and a task driver that steps suspendable computations
//! to completion.
//!
//! # Why?
//!
//! This crate is the classic "callback scheduler + promise + coroutine driver" trio found at the
//! core of single-threaded async runtimes, pared down to exactly that core. It has no I/O
//! readiness polling, no thread pool, no structured-concurrency groups — just time-ordered
//! scheduling and the futures/tasks layer built on top of it.
//!
//! # Overview
//!
//! - [`EventLoop`] - owns the time-ordered queue of scheduled callbacks, the running/closed
//!   flags, the current-task pointer, and the live-task set.
//! - [`Handle`] / [`TimerHandle`] - cancellation tokens for one scheduled callback.
//! - [`Future`] - a settable single-assignment result cell with completion callbacks.
//! - [`Task`] - drives a suspendable computation (any `async` block or function returning
//!   `Result<T, Error>`) to completion, relaying its awaited futures through the loop.
//! - [`Error`] - the closed taxonomy of failure kinds this crate can produce.
//!
//! # What this crate is not
//!
//! There is no I/O multiplexing here (no epoll/select/kqueue equivalent): everything is driven by
//! time. There is no multi-threading: every type that closes over loop state is `!Send + !Sync`.
//! Timeouts are not a built-in combinator; compose one with `call_later(duration, future.cancel)`.
//!
//! # Examples
//!
//! ## Scheduling plain callbacks
//!
//! ```
//! use tock::EventLoop;
//!
//! let event_loop = EventLoop::new();
//! let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
//!
//! let seen1 = std::rc::Rc::clone(&seen);
//! event_loop.call_soon(move || seen1.borrow_mut().push("first")).unwrap();
//! let el = event_loop.clone();
//! event_loop.call_soon(move || el.stop()).unwrap();
//!
//! event_loop.run_forever().unwrap();
//! assert_eq!(*seen.borrow(), vec!["first"]);
//! ```
//!
//! ## Running a computation to completion
//!
//! ```
//! use tock::{run, Error};
//!
//! let result: Result<i32, Error> = run(async {
//!     let event_loop = tock::get_running_loop()?;
//!     let future = tock::Future::<i32>::new(event_loop.clone());
//!     let f = future.clone();
//!     event_loop.call_soon(move || { let _ = f.set_result(9); }).unwrap();
//!     future.await
//! });
//! assert_eq!(result.unwrap(), 9);
//! ```

mod context;
mod error;
mod event_loop;
mod future;
mod future_cell;
mod handle;
mod scheduled;
mod task;

use std::rc::Rc;

pub use context::{get_event_loop, get_running_loop, new_event_loop, run, set_event_loop};
pub use error::{Error, Result};
pub use event_loop::{EventLoop, ExceptionContext};
pub use future::Future;
pub use future_cell::Awaitable;
pub use handle::{Handle, TimerHandle};
pub use task::{spawn, AnyTask, Computation, Task};

/// The task currently being resumed on `event_loop` (or the current running loop if `None`).
///
/// Fails with [`Error::RuntimeError`] if `event_loop` is `None` and no loop is currently running.
pub fn current_task(event_loop: Option<EventLoop>) -> Result<Option<Rc<dyn AnyTask>>> {
    let event_loop = match event_loop {
        Some(event_loop) => event_loop,
        None => get_running_loop()?,
    };
    Ok(event_loop.current_task())
}

/// A snapshot of every not-yet-done task on `event_loop` (or the current running loop if
/// `None`).
///
/// Fails with [`Error::RuntimeError`] if `event_loop` is `None` and no loop is currently running.
pub fn all_tasks(event_loop: Option<EventLoop>) -> Result<Vec<Rc<dyn AnyTask>>> {
    let event_loop = match event_loop {
        Some(event_loop) => event_loop,
        None => get_running_loop()?,
    };
    Ok(event_loop.all_tasks())
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn current_task_without_running_loop_fails() {
        std::thread::spawn(|| {
            assert!(matches!(current_task(None), Err(Error::RuntimeError(_))));
        })
        .join()
        .unwrap();
    }
}
