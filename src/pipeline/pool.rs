//! Bounded worker pool used to cap in-flight invocations of one stage.
//!
//! At most `capacity` tasks are admitted at once; `invoke` blocks the
//! submitting thread while the pool is saturated, which is what propagates
//! backpressure up the chain.
//!
//! Workers are OS threads spawned lazily, one at a time, whenever an
//! admitted task would otherwise have no worker to pick it up. Their number
//! never exceeds `max_workers`; admitted tasks beyond that wait on the job
//! channel for the next free worker.
//!
//! Tasks reach workers through an unbounded crossbeam channel. Admission is
//! controlled by the busy counter, not by the channel, so the channel never
//! holds more than `capacity` tasks.

use crate::pipeline::error::{panic_message, PoolError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// A unit of work executed by a pool worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
struct PoolState {
    /// Admitted tasks that have not finished yet, queued ones included.
    busy: usize,
    workers: usize,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<PoolState>,
    slot_freed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A task the pool refused, handed back so the caller can still run it.
pub struct Rejected {
    pub error: PoolError,
    job: Job,
}

impl Rejected {
    pub fn into_job(self) -> Job {
        self.job
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Fixed-capacity, lazily grown thread pool.
pub struct WorkerPool {
    name: String,
    capacity: usize,
    max_workers: usize,
    shared: Arc<Shared>,
    job_tx: Mutex<Option<Sender<Job>>>,
    job_rx: Receiver<Job>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create an empty pool with one worker per admitted task.
    ///
    /// A `capacity` of zero is treated as one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::with_worker_limit(name, capacity, capacity)
    }

    /// Create an empty pool admitting `capacity` tasks on at most
    /// `max_workers` threads. Zero values are treated as one, and the worker
    /// limit never exceeds the capacity.
    pub fn with_worker_limit(name: impl Into<String>, capacity: usize, max_workers: usize) -> Self {
        let capacity = capacity.max(1);
        let (job_tx, job_rx) = unbounded();
        Self {
            name: name.into(),
            capacity,
            max_workers: max_workers.clamp(1, capacity),
            shared: Arc::new(Shared::default()),
            job_tx: Mutex::new(Some(job_tx)),
            job_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Tasks currently admitted and not yet finished.
    pub fn running(&self) -> usize {
        self.shared.lock().busy
    }

    /// Worker threads spawned so far.
    pub fn workers(&self) -> usize {
        self.shared.lock().workers
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Submit `task`, blocking while `capacity` tasks are already running.
    ///
    /// On failure the task is returned inside [`Rejected`] unexecuted.
    pub fn invoke<F>(&self, task: F) -> Result<(), Rejected>
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(task);

        let needs_worker = {
            let mut state = self.shared.lock();
            while !state.closed && state.busy >= self.capacity {
                state = self
                    .shared
                    .slot_freed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if state.closed {
                return Err(Rejected {
                    error: PoolError::Closed(self.name.clone()),
                    job,
                });
            }
            state.busy += 1;
            // Every worker is busy or already claimed by a queued task.
            let spawn = state.busy > state.workers && state.workers < self.max_workers;
            if spawn {
                state.workers += 1;
            }
            spawn
        };

        let job_tx = self
            .job_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(job_tx) = job_tx else {
            self.give_back_slot(needs_worker);
            return Err(Rejected {
                error: PoolError::Closed(self.name.clone()),
                job,
            });
        };

        if needs_worker {
            if let Err(source) = self.spawn_worker() {
                self.give_back_slot(true);
                return Err(Rejected {
                    error: PoolError::Spawn {
                        name: self.name.clone(),
                        source,
                    },
                    job,
                });
            }
        }

        // The pool keeps a receiver alive, so this only fails after release.
        if let Err(err) = job_tx.send(job) {
            self.give_back_slot(false);
            return Err(Rejected {
                error: PoolError::Closed(self.name.clone()),
                job: err.into_inner(),
            });
        }
        Ok(())
    }

    fn give_back_slot(&self, drop_worker: bool) {
        let mut state = self.shared.lock();
        state.busy -= 1;
        if drop_worker {
            state.workers -= 1;
        }
        drop(state);
        self.shared.slot_freed.notify_one();
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let thread_name = format!("{}-worker-{}", self.name, handles.len());
        let pool_name = self.name.clone();
        let shared = Arc::clone(&self.shared);
        let job_rx = self.job_rx.clone();
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker_loop(&pool_name, &shared, &job_rx))?;
        handles.push(handle);
        Ok(())
    }

    /// Stop accepting tasks, let queued tasks finish and join every worker.
    ///
    /// Safe to call more than once. Must not be called from one of this
    /// pool's own workers.
    pub fn release(&self) {
        {
            let mut state = self.shared.lock();
            state.closed = true;
        }
        self.shared.slot_freed.notify_all();

        // Dropping the last sender lets workers drain the channel and exit.
        drop(
            self.job_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let joined = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(pool = %self.name, "Worker thread terminated abnormally");
            }
        }
        if joined > 0 {
            tracing::debug!(pool = %self.name, workers = joined, "Pool released");
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.release();
    }
}

fn worker_loop(pool_name: &str, shared: &Shared, job_rx: &Receiver<Job>) {
    while let Ok(job) = job_rx.recv() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            tracing::error!(
                pool = %pool_name,
                "Pool task panicked: {}",
                panic_message(payload.as_ref())
            );
        }

        let mut state = shared.lock();
        state.busy -= 1;
        drop(state);
        shared.slot_freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_runs_all_tasks() {
        let pool = WorkerPool::new("test", 4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.invoke(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.release();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert!(pool.workers() <= 4);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let pool = WorkerPool::new("bounded", 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            pool.invoke(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(2));
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.release();
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.running(), 0);
    }

    #[test]
    fn test_reuses_idle_workers() {
        let pool = WorkerPool::new("reuse", 8);
        for _ in 0..10 {
            let (done_tx, done_rx) = crossbeam_channel::bounded(1);
            pool.invoke(move || {
                let _ = done_tx.send(());
            })
            .unwrap();
            done_rx.recv().unwrap();
            // Wait until the worker has finished its task.
            while pool.running() > 0 {
                thread::yield_now();
            }
        }
        assert_eq!(pool.workers(), 1);
        pool.release();
    }

    #[test]
    fn test_rejects_after_release() {
        let pool = WorkerPool::new("closed", 1);
        pool.release();
        assert!(pool.is_closed());

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        let rejected = pool
            .invoke(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();
        assert!(matches!(rejected.error, PoolError::Closed(_)));

        // The task comes back unexecuted and can still be run by the caller.
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        (rejected.into_job())();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_survives_panicking_task() {
        let pool = WorkerPool::new("panics", 1);
        pool.invoke(|| panic!("task failure")).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.invoke(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.release();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_limit_caps_threads_not_admission() {
        let pool = WorkerPool::with_worker_limit("limited", 16, 2);
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let gate_rx = gate_rx.clone();
            let finished = Arc::clone(&finished);
            pool.invoke(move || {
                let _ = gate_rx.recv();
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        // All sixteen tasks were admitted without blocking, on two threads.
        assert_eq!(pool.running(), 16);
        assert_eq!(pool.workers(), 2);

        for _ in 0..16 {
            gate_tx.send(()).unwrap();
        }
        pool.release();
        assert_eq!(finished.load(Ordering::SeqCst), 16);
        assert_eq!(pool.workers(), 2);
    }

    #[test]
    fn test_worker_limit_is_clamped() {
        let pool = WorkerPool::with_worker_limit("clamped", 3, 100);
        assert_eq!(pool.max_workers(), 3);
        let pool = WorkerPool::with_worker_limit("zero", 0, 0);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.max_workers(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = WorkerPool::new("twice", 2);
        pool.invoke(|| {}).unwrap();
        pool.release();
        pool.release();
        assert_eq!(pool.capacity(), 2);
    }
}
