//! Pipeline executor: turns a stage chain into running dispatch loops.
//!
//! `run` wires one bounded channel between every pair of adjacent stages:
//!
//! ```text
//! feed ─► [ch 0] ─► root ─► [ch 1] ─► stage 1 ─► … ─► stage N-1 ─► [out] ─► sink ─► callback
//!                     │                  │                 │
//!                     └──────────────────┴── on error ─────┴──────► [out]
//! ```
//!
//! Each stage gets a dispatcher thread reading its input channel. With
//! pooling enabled, every unit becomes a task on that stage's bounded
//! [`WorkerPool`]; with pooling disabled the dispatcher runs the stage
//! inline. A unit whose error slot is set after a stage skips the rest of the
//! chain and goes straight to the output channel.
//!
//! `wait` blocks until the pending counter is back to zero, then closes the
//! input, which lets every dispatcher and the sink exit in turn, and
//! releases the pools.

use crate::pipeline::chain::{Chain, StageRef};
use crate::pipeline::error::{PipelineError, PipelineResult, StagePanic};
use crate::pipeline::id::{StageId, UnitId};
use crate::pipeline::options::{Options, RunOption};
use crate::pipeline::pending::PendingCounter;
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::sink::{Counters, PipelineStats, ResultFn, ResultSink};
use crate::pipeline::stage::Stage;
use crate::pipeline::unit::Unit;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Lifecycle of a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Chain can still be built; nothing is running.
    Building,
    Running,
    /// `wait` finished; the pipeline cannot be fed again.
    Finished,
}

/// Threads and pools owned by a running pipeline.
struct Runtime {
    dispatchers: Vec<JoinHandle<()>>,
    sink: JoinHandle<()>,
    pools: Vec<Arc<WorkerPool>>,
}

/// Linear multi-stage pipeline over payloads of type `T`.
pub struct Pipeline<T> {
    chain: Chain<T>,
    buffer_size: usize,
    pending: Arc<PendingCounter>,
    counters: Arc<Counters>,
    input: Option<Sender<Unit<T>>>,
    runtime: Option<Runtime>,
    state: RunState,
    options: Option<Options>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Create a pipeline whose channels all hold up to `buffer_size` units.
    ///
    /// A size of zero gives rendezvous channels.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            chain: Chain::new(),
            buffer_size,
            pending: Arc::new(PendingCounter::new()),
            counters: Arc::new(Counters::default()),
            input: None,
            runtime: None,
            state: RunState::Building,
            options: None,
        }
    }

    // ── Chain building ──

    /// Attach a stage built from `func` directly after the root.
    pub fn then<F>(&mut self, func: F) -> StageRef<'_, T>
    where
        F: Fn(&mut Unit<T>) + Send + Sync + 'static,
    {
        StageRef::new(&mut self.chain, StageId::ROOT).then(func)
    }

    /// Attach an already constructed stage directly after the root.
    pub fn then_stage(&mut self, stage: Stage<T>) -> StageRef<'_, T> {
        StageRef::new(&mut self.chain, StageId::ROOT).then_stage(stage)
    }

    /// Handle to the last stage of the chain, for appending.
    pub fn tail(&mut self) -> StageRef<'_, T> {
        let tail = self.chain.tail();
        StageRef::new(&mut self.chain, tail)
    }

    /// Handle to an existing stage.
    pub fn stage(&mut self, id: StageId) -> Option<StageRef<'_, T>> {
        if self.chain.contains(id) {
            Some(StageRef::new(&mut self.chain, id))
        } else {
            None
        }
    }

    pub fn chain(&self) -> &Chain<T> {
        &self.chain
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Options resolved by `run`, if it has been called.
    pub fn options(&self) -> Option<&Options> {
        self.options.as_ref()
    }

    /// Units fed plus stage tasks in flight that have not finished.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    // ── Lifecycle ──

    /// Wire the channels, start the dispatchers and the result sink.
    ///
    /// `callback` is invoked exactly once per fed unit, from a sink pool
    /// thread, when the unit finished the chain or failed in a stage.
    pub fn run<F>(
        &mut self,
        callback: F,
        options: impl IntoIterator<Item = RunOption>,
    ) -> PipelineResult<()>
    where
        F: Fn(Unit<T>) + Send + Sync + 'static,
    {
        if self.state != RunState::Building {
            return Err(PipelineError::AlreadyRunning);
        }

        let options = Options::load(options);
        let stages = self.chain.ordered()?;
        let stage_count = stages.len();

        let (input_tx, input_rx) = bounded(self.buffer_size);
        let (output_tx, output_rx) = bounded(self.buffer_size);

        // receivers[i] feeds stage i; senders[i] is where stage i forwards.
        let mut receivers = Vec::with_capacity(stage_count);
        let mut senders = Vec::with_capacity(stage_count);
        receivers.push(input_rx);
        for _ in 1..stage_count {
            let (tx, rx) = bounded(self.buffer_size);
            senders.push(tx);
            receivers.push(rx);
        }
        senders.push(output_tx.clone());

        let mut pools = Vec::new();
        let mut dispatchers = Vec::with_capacity(stage_count);
        for (index, ((stage, input), next)) in stages
            .into_iter()
            .zip(receivers)
            .zip(senders)
            .enumerate()
        {
            let pool = if options.pool_enabled() {
                let pool = Arc::new(WorkerPool::with_worker_limit(
                    format!("stage-{index}"),
                    options.pool_size,
                    options.worker_limit(),
                ));
                pools.push(Arc::clone(&pool));
                Some(pool)
            } else {
                None
            };

            let dispatcher = Dispatcher {
                input,
                pool,
                task: Arc::new(StageTask {
                    index,
                    stage,
                    next,
                    output: output_tx.clone(),
                    pending: Arc::clone(&self.pending),
                }),
            };
            dispatchers.push(spawn_named(format!("flowline-stage-{index}"), move || {
                dispatcher.run()
            })?);
        }
        drop(output_tx);

        let sink_pool = Arc::new(WorkerPool::with_worker_limit(
            "results",
            options.pool_size,
            options.worker_limit(),
        ));
        pools.push(Arc::clone(&sink_pool));
        let sink = ResultSink {
            output: output_rx,
            pool: sink_pool,
            callback: Arc::new(callback) as ResultFn<T>,
            pending: Arc::clone(&self.pending),
            counters: Arc::clone(&self.counters),
        };
        let sink = spawn_named("flowline-sink".to_string(), move || sink.run())?;

        tracing::info!(
            stages = stage_count - 1,
            buffer = self.buffer_size,
            pool_size = options.pool_size,
            workers = options.worker_limit(),
            pooled = options.pool_enabled(),
            "Pipeline started"
        );

        self.input = Some(input_tx);
        self.runtime = Some(Runtime {
            dispatchers,
            sink,
            pools,
        });
        self.options = Some(options);
        self.state = RunState::Running;
        Ok(())
    }

    /// Submit `payload` as a new unit and return its id.
    ///
    /// Blocks while the input channel is full. Does not wait for processing.
    pub fn feed(&self, payload: T) -> PipelineResult<UnitId> {
        self.feed_unit(Unit::new(payload))
    }

    /// Submit an already constructed unit, e.g. to retry a failed payload.
    pub fn feed_unit(&self, unit: Unit<T>) -> PipelineResult<UnitId> {
        let input = self.input.as_ref().ok_or(PipelineError::NotRunning)?;
        let id = unit.id();

        self.pending.add(1);
        if input.send(unit).is_err() {
            self.pending.done();
            return Err(PipelineError::ChannelSend);
        }
        self.counters.fed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(unit = %id, "Unit fed");
        Ok(id)
    }

    /// Block until every fed unit reached the callback, then shut down.
    ///
    /// Calling `wait` again, or before `run`, returns immediately.
    pub fn wait(&mut self) {
        if self.state != RunState::Running {
            return;
        }
        self.pending.wait_zero();
        self.shutdown();

        let stats = self.stats();
        tracing::info!(
            fed = stats.fed,
            completed = stats.completed,
            failed = stats.failed,
            "Pipeline drained"
        );
    }

    fn shutdown(&mut self) {
        // Closing the input cascades: each dispatcher exits once its
        // upstream senders are gone, and the sink exits last.
        drop(self.input.take());

        if let Some(runtime) = self.runtime.take() {
            for handle in runtime.dispatchers {
                if handle.join().is_err() {
                    tracing::error!("Dispatcher thread panicked");
                }
            }
            if runtime.sink.join().is_err() {
                tracing::error!("Result sink thread panicked");
            }
            for pool in &runtime.pools {
                pool.release();
            }
        }
        self.state = RunState::Finished;
    }
}

impl<T> Drop for Pipeline<T> {
    fn drop(&mut self) {
        // Without `wait`, units already fed still run to completion; the
        // threads exit once the input is closed. They are not joined here.
        drop(self.input.take());
    }
}

fn spawn_named<F>(name: String, body: F) -> PipelineResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map_err(|source| PipelineError::Spawn { name, source })
}

/// Everything a task needs to process one unit at one stage.
struct StageTask<T> {
    index: usize,
    stage: Stage<T>,
    next: Sender<Unit<T>>,
    output: Sender<Unit<T>>,
    pending: Arc<PendingCounter>,
}

impl<T> StageTask<T> {
    fn execute(&self, mut unit: Unit<T>) {
        let _guard = self.pending.guard();

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.stage.run(&mut unit))) {
            let panic = StagePanic::from_payload(self.stage.name(), payload.as_ref());
            tracing::error!(unit = %unit.id(), stage = self.index, "{}", panic);
            unit.set_err(panic);
        }
        // Counted before routing since the unit is moved by the send.
        unit.advance_step();

        let id = unit.id();
        let failed = unit.is_err();
        let target = if failed { &self.output } else { &self.next };
        if failed {
            tracing::debug!(unit = %id, stage = self.index, "Unit failed; routing to output");
        }
        if target.send(unit).is_err() {
            // Only possible if the downstream side is gone, i.e. a thread died.
            tracing::error!(unit = %id, stage = self.index, "Downstream channel closed; unit lost");
        }
    }
}

struct Dispatcher<T> {
    input: Receiver<Unit<T>>,
    pool: Option<Arc<WorkerPool>>,
    task: Arc<StageTask<T>>,
}

impl<T: Send + 'static> Dispatcher<T> {
    fn run(self) {
        let index = self.task.index;
        tracing::debug!(stage = index, name = self.task.stage.name(), "Dispatcher started");

        for unit in self.input.iter() {
            match &self.pool {
                Some(pool) => {
                    let task = Arc::clone(&self.task);
                    if let Err(rejected) = pool.invoke(move || task.execute(unit)) {
                        tracing::error!(
                            stage = index,
                            "Stage pool rejected a unit ({}); running inline",
                            rejected.error
                        );
                        (rejected.into_job())();
                    }
                }
                None => self.task.execute(unit),
            }
        }

        tracing::debug!(stage = index, "Dispatcher exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::options::{with_disable_pool, with_pool_size};
    use anyhow::anyhow;
    use std::sync::Mutex;

    type Collected<T> = Arc<Mutex<Vec<Unit<T>>>>;

    fn collector<T: Send + 'static>() -> (Collected<T>, impl Fn(Unit<T>) + Send + Sync + 'static) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        (results, move |unit: Unit<T>| sink.lock().unwrap().push(unit))
    }

    #[test]
    fn test_inline_composition_is_deterministic() {
        let mut pipeline = Pipeline::new(1);
        pipeline
            .then(|unit: &mut Unit<String>| unit.payload_mut().push('A'))
            .then(|unit: &mut Unit<String>| unit.payload_mut().push('B'));

        let (results, callback) = collector();
        pipeline.run(callback, [with_disable_pool()]).unwrap();
        pipeline.feed(String::new()).unwrap();
        pipeline.wait();

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload(), "AB");
        // root + two stages
        assert_eq!(results[0].step(), 2);
    }

    #[test]
    fn test_run_twice_fails() {
        let mut pipeline: Pipeline<u32> = Pipeline::new(1);
        pipeline.run(|_| {}, []).unwrap();
        assert!(matches!(
            pipeline.run(|_| {}, []),
            Err(PipelineError::AlreadyRunning)
        ));
        pipeline.wait();
        assert_eq!(pipeline.state(), RunState::Finished);
    }

    #[test]
    fn test_feed_requires_running_pipeline() {
        let mut pipeline: Pipeline<u32> = Pipeline::new(1);
        assert!(matches!(pipeline.feed(1), Err(PipelineError::NotRunning)));

        pipeline.run(|_| {}, [with_pool_size(1)]).unwrap();
        pipeline.feed(1).unwrap();
        pipeline.wait();
        assert!(matches!(pipeline.feed(2), Err(PipelineError::NotRunning)));
    }

    #[test]
    fn test_branching_chain_refuses_to_run() {
        let mut pipeline: Pipeline<u32> = Pipeline::new(1);
        pipeline.then(|_: &mut Unit<u32>| {});
        pipeline.then(|_: &mut Unit<u32>| {});
        assert!(matches!(
            pipeline.run(|_| {}, []),
            Err(PipelineError::Branching { .. })
        ));
        assert_eq!(pipeline.state(), RunState::Building);
    }

    #[test]
    fn test_error_skips_remaining_stages() {
        let mut pipeline = Pipeline::new(4);
        pipeline
            .then(|unit: &mut Unit<u32>| {
                unit.set_err(anyhow!("stage one failed"));
            })
            .then(|unit: &mut Unit<u32>| *unit.payload_mut() += 100);

        let (results, callback) = collector();
        pipeline.run(callback, [with_pool_size(2)]).unwrap();
        pipeline.feed(1).unwrap();
        pipeline.wait();

        let results = results.lock().unwrap();
        assert_eq!(*results[0].payload(), 1);
        assert_eq!(results[0].step(), 1);
        assert_eq!(results[0].err().unwrap().to_string(), "stage one failed");
        assert_eq!(pipeline.stats().failed, 1);
    }

    #[test]
    fn test_panicking_stage_becomes_unit_error() {
        let mut pipeline = Pipeline::new(1);
        pipeline.then_stage(Stage::named("explode", |_: &mut Unit<u32>| {
            panic!("kaboom")
        }));

        let (results, callback) = collector();
        pipeline.run(callback, []).unwrap();
        pipeline.feed(7).unwrap();
        pipeline.wait();

        let results = results.lock().unwrap();
        let message = results[0].err().unwrap().to_string();
        assert!(message.contains("explode"));
        assert!(message.contains("kaboom"));
    }

    #[test]
    fn test_tail_appends_to_end() {
        let mut pipeline: Pipeline<u32> = Pipeline::new(1);
        pipeline.then(|unit: &mut Unit<u32>| *unit.payload_mut() += 1);
        pipeline.tail().then(|unit: &mut Unit<u32>| *unit.payload_mut() *= 10);
        assert_eq!(pipeline.chain().len(), 3);

        let (results, callback) = collector();
        pipeline.run(callback, [with_disable_pool()]).unwrap();
        pipeline.feed(1).unwrap();
        pipeline.wait();
        assert_eq!(*results.lock().unwrap()[0].payload(), 20);
    }

    #[test]
    fn test_rejected_unit_runs_inline() {
        let pool = Arc::new(WorkerPool::new("stage-1", 1));
        pool.release();

        let (input_tx, input_rx) = bounded(1);
        let (next_tx, next_rx) = bounded(1);
        let (output_tx, _output_rx) = bounded(1);
        let pending = Arc::new(PendingCounter::new());
        let dispatcher = Dispatcher {
            input: input_rx,
            pool: Some(pool),
            task: Arc::new(StageTask {
                index: 1,
                stage: Stage::named("double", |unit: &mut Unit<u32>| *unit.payload_mut() *= 2),
                next: next_tx,
                output: output_tx,
                pending: Arc::clone(&pending),
            }),
        };

        input_tx.send(Unit::new(21)).unwrap();
        drop(input_tx);
        dispatcher.run();

        let unit = next_rx.try_recv().unwrap();
        assert_eq!(*unit.payload(), 42);
        assert_eq!(unit.step(), 0);
        assert!(!unit.is_err());
        assert_eq!(pending.get(), 0);
    }

    #[test]
    fn test_wait_before_run_returns() {
        let mut pipeline: Pipeline<u32> = Pipeline::new(0);
        pipeline.wait();
        assert_eq!(pipeline.state(), RunState::Building);
    }
}
