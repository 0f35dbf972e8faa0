// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end scenarios, one test per literal scenario in `SPEC_FULL.md` §8.

use std::cell::RefCell;
use std::rc::Rc;

use tock::{EventLoop, Error};

#[test]
fn s1_ordering() {
    let event_loop = EventLoop::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let log_a = Rc::clone(&log);
    event_loop.call_later(-1e-4, move || log_a.borrow_mut().push("first")).unwrap();
    let log_b = Rc::clone(&log);
    event_loop.call_later(2e-4, move || log_b.borrow_mut().push("second")).unwrap();
    let el = event_loop.clone();
    event_loop.call_later(3e-4, move || el.stop()).unwrap();

    event_loop.run_forever().unwrap();
    assert_eq!(*log.borrow(), vec!["first", "second"]);
}

#[test]
fn s2_callback_args() {
    let event_loop = EventLoop::new();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let log1 = Rc::clone(&log);
    event_loop.call_soon(move || log1.borrow_mut().push("first")).unwrap();
    let el = event_loop.clone();
    event_loop.call_soon(move || el.stop()).unwrap();

    event_loop.run_forever().unwrap();
    assert_eq!(*log.borrow(), vec!["first"]);
}

#[test]
fn s3_run_until_complete() {
    let event_loop = EventLoop::new();
    let future = tock::Future::<i32>::new(event_loop.clone());

    let f = future.clone();
    event_loop.call_soon(move || { let _ = f.set_result(9); }).unwrap();

    let result = event_loop.run_until_complete(&future).unwrap();
    assert_eq!(result, 9);
}

#[test]
fn s4_exception_propagation() {
    let event_loop = EventLoop::new();

    #[derive(Debug)]
    struct DivideByZero;
    impl std::fmt::Display for DivideByZero {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "attempt to divide by zero")
        }
    }
    impl std::error::Error for DivideByZero {}

    let task = tock::spawn(event_loop.clone(), async { Err(Error::failed(DivideByZero)) });
    let result = event_loop.run_until_complete(&task);
    assert!(matches!(result, Err(Error::Failed(_))));
}

#[test]
fn s5_cancel_task_blocking_on_future() {
    let event_loop = EventLoop::new();
    let inner = tock::Future::<i32>::new(event_loop.clone());
    let awaited = inner.clone();
    let task = tock::spawn(event_loop.clone(), async move { awaited.await });

    let any_task = task.as_any_task();
    event_loop.call_soon(move || { any_task.cancel(); }).unwrap();

    let result = event_loop.run_until_complete(&task);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(inner.cancelled());
}

#[test]
fn s6_stop_drains() {
    let event_loop = EventLoop::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let el = event_loop.clone();
    event_loop.call_soon(move || el.stop()).unwrap();
    let log1 = Rc::clone(&log);
    event_loop.call_soon(move || log1.borrow_mut().push("first")).unwrap();
    let log2 = Rc::clone(&log);
    event_loop.call_later(0.0, move || log2.borrow_mut().push("second")).unwrap();

    event_loop.run_forever().unwrap();
    assert_eq!(*log.borrow(), vec!["first", "second"]);
}

#[test]
fn s7_closed_loop_rejects_scheduling() {
    let event_loop = EventLoop::new();
    event_loop.close().unwrap();
    assert!(matches!(event_loop.call_soon(|| {}), Err(Error::RuntimeError(_))));
}
