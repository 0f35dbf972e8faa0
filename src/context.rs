// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The process-wide (here: thread-local) "current loop" slot described in `SPEC_FULL.md` §9.
//!
//! A single host process may run more than one OS thread even though no single loop may ever be
//! touched from more than one of them; the slot is therefore `thread_local!`, one independent
//! slot per thread, each with its own three states.

use std::cell::RefCell;

use crate::error::{Error, Result};
use crate::event_loop::EventLoop;

enum Slot {
    /// Nothing has ever been asked of this slot yet.
    ImplicitUnset,
    /// `set_event_loop(None)` was called explicitly.
    ExplicitUnset,
    /// A loop has been installed.
    Set(EventLoop),
}

thread_local! {
    static CURRENT: RefCell<Slot> = RefCell::new(Slot::ImplicitUnset);
}

/// Returns the current thread's event loop, creating one on first use.
///
/// Raises [`Error::RuntimeError`] if [`set_event_loop`] was explicitly called with `None` and
/// nothing has been set since.
pub fn get_event_loop() -> Result<EventLoop> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        match &*slot {
            Slot::Set(event_loop) => Ok(event_loop.clone()),
            Slot::ImplicitUnset => {
                let event_loop = EventLoop::new();
                *slot = Slot::Set(event_loop.clone());
                Ok(event_loop)
            }
            Slot::ExplicitUnset => Err(Error::RuntimeError("no current event loop is set")),
        }
    })
}

/// Creates a new, unregistered event loop. Does not affect the current-loop slot.
pub fn new_event_loop() -> EventLoop {
    EventLoop::new()
}

/// Installs `event_loop` as the current thread's loop, or explicitly clears it (`None`).
pub fn set_event_loop(event_loop: Option<EventLoop>) {
    CURRENT.with(|slot| {
        *slot.borrow_mut() = match event_loop {
            Some(event_loop) => Slot::Set(event_loop),
            None => Slot::ExplicitUnset,
        };
    });
}

fn clear_event_loop() {
    CURRENT.with(|slot| {
        *slot.borrow_mut() = Slot::ImplicitUnset;
    });
}

/// Returns the current thread's loop, but only if it is actually running.
///
/// Raises [`Error::RuntimeError`] if no loop is set, or the set loop's `is_running()` is false.
pub fn get_running_loop() -> Result<EventLoop> {
    CURRENT.with(|slot| match &*slot.borrow() {
        Slot::Set(event_loop) if event_loop.is_running() => Ok(event_loop.clone()),
        _ => Err(Error::RuntimeError("no running event loop")),
    })
}

/// Runs `computation` to completion on a fresh loop, installed as the current loop for the
/// duration of the call.
///
/// Closes the loop and clears the current-loop slot before returning, even if `computation`
/// fails.
pub fn run<T: Clone + 'static>(
    computation: impl crate::task::Computation<T> + 'static,
) -> Result<T> {
    let event_loop = new_event_loop();
    set_event_loop(Some(event_loop.clone()));

    let task = crate::task::spawn(event_loop.clone(), computation);
    let result = event_loop.run_until_complete(&task);

    let _ = event_loop.close();
    clear_event_loop();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_event_loop_auto_creates_and_reuses() {
        // Each test in this crate runs on its own thread, one `thread_local` slot at a time, so
        // run this on an isolated thread to start from a fresh, unset slot.
        std::thread::spawn(|| {
            let a = get_event_loop().unwrap();
            let b = get_event_loop().unwrap();
            // Same underlying loop: closing `a` is observable through `b`.
            a.close().unwrap();
            assert!(b.is_closed());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn explicit_unset_raises() {
        std::thread::spawn(|| {
            set_event_loop(None);
            assert!(matches!(get_event_loop(), Err(Error::RuntimeError(_))));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn get_running_loop_raises_when_nothing_running() {
        std::thread::spawn(|| {
            assert!(matches!(get_running_loop(), Err(Error::RuntimeError(_))));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn run_closes_the_loop_and_clears_the_slot() {
        std::thread::spawn(|| {
            let result: Result<i32> = run(async { Ok(7) });
            assert_eq!(result.unwrap(), 7);
        })
        .join()
        .unwrap();
    }
}
