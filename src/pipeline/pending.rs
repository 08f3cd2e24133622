//! Completion bookkeeping shared by `feed`, the dispatchers and the result sink.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Counter of units (and in-flight tasks) that have not finished yet.
///
/// `wait_zero` blocks until every `add` has been matched by a `done`.
#[derive(Debug, Default)]
pub struct PendingCounter {
    count: Mutex<usize>,
    zero: Condvar,
}

impl PendingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += n;
    }

    pub fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(*count > 0, "pending counter underflow");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    pub fn get(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait_zero(&self) {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let _count = self
            .zero
            .wait_while(count, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Register one in-flight task until the guard is dropped.
    pub fn guard(self: &Arc<Self>) -> PendingGuard {
        self.add(1);
        PendingGuard {
            counter: Arc::clone(self),
        }
    }
}

/// Holds one pending slot; released on drop, panics included.
#[derive(Debug)]
pub struct PendingGuard {
    counter: Arc<PendingCounter>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.counter.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_zero_returns_immediately_when_idle() {
        let counter = PendingCounter::new();
        counter.wait_zero();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let counter = Arc::new(PendingCounter::new());
        let guard = counter.guard();
        assert_eq!(counter.get(), 1);
        drop(guard);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_wait_zero_blocks_until_done() {
        let counter = Arc::new(PendingCounter::new());
        counter.add(3);
        let worker = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..3 {
                    thread::sleep(Duration::from_millis(5));
                    counter.done();
                }
            })
        };
        counter.wait_zero();
        assert_eq!(counter.get(), 0);
        worker.join().unwrap();
    }
}
