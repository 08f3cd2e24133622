//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use flowline::Unit;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Units handed to a result callback, in delivery order
pub type Delivered<T> = Arc<Mutex<Vec<Unit<T>>>>;

/// A result callback that stores every unit it receives
pub fn collector<T: Send + 'static>() -> (Delivered<T>, impl Fn(Unit<T>) + Send + Sync + 'static) {
    let delivered: Delivered<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    (delivered, move |unit: Unit<T>| sink.lock().unwrap().push(unit))
}

/// Run `f` on a helper thread and fail the test if it does not finish in time
pub fn within_timeout<R, F>(f: F) -> R
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(test_timeout())
        .expect("operation did not finish before the test timeout")
}
