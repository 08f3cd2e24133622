//! Result sink: drains terminal units and hands them to the caller.
//!
//! Every unit that leaves the chain, successful or failed, arrives on the
//! output channel exactly once. The sink invokes the result callback on its
//! own pool and then resolves one pending slot.

use crate::pipeline::error::panic_message;
use crate::pipeline::pending::PendingCounter;
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::unit::Unit;
use crossbeam_channel::Receiver;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback receiving every unit once it reaches a terminal state.
pub type ResultFn<T> = Arc<dyn Fn(Unit<T>) + Send + Sync>;

/// Running totals kept by the pipeline.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub fed: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Units accepted by `feed`.
    pub fed: u64,
    /// Units delivered to the callback without an error.
    pub completed: u64,
    /// Units delivered to the callback carrying an error.
    pub failed: u64,
}

impl PipelineStats {
    /// Units fed but not delivered yet.
    pub fn in_flight(&self) -> u64 {
        self.fed.saturating_sub(self.completed + self.failed)
    }
}

impl Counters {
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            fed: self.fed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct ResultSink<T> {
    pub output: Receiver<Unit<T>>,
    pub pool: Arc<WorkerPool>,
    pub callback: ResultFn<T>,
    pub pending: Arc<PendingCounter>,
    pub counters: Arc<Counters>,
}

impl<T: Send + 'static> ResultSink<T> {
    /// Drain the output channel until every sender is gone.
    pub fn run(self) {
        for unit in self.output.iter() {
            let callback = Arc::clone(&self.callback);
            let pending = Arc::clone(&self.pending);
            let counters = Arc::clone(&self.counters);
            let delivery = move || deliver(unit, &callback, &pending, &counters);

            if let Err(rejected) = self.pool.invoke(delivery) {
                tracing::error!(
                    "Result pool rejected a unit ({}); delivering inline",
                    rejected.error
                );
                (rejected.into_job())();
            }
        }
        tracing::debug!("Result sink drained");
    }
}

fn deliver<T>(unit: Unit<T>, callback: &ResultFn<T>, pending: &PendingCounter, counters: &Counters) {
    let id = unit.id();
    if unit.is_err() {
        counters.failed.fetch_add(1, Ordering::Relaxed);
    } else {
        counters.completed.fetch_add(1, Ordering::Relaxed);
    }
    tracing::trace!(unit = %id, step = unit.step(), "Delivering unit");

    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(unit))) {
        tracing::error!(
            unit = %id,
            "Result callback panicked: {}",
            panic_message(payload.as_ref())
        );
    }
    pending.done();
}
