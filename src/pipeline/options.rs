//! Run options for a pipeline.
//!
//! Options are small closures applied in order over the defaults when
//! `Pipeline::run` is called. They can only touch the fields of [`Options`],
//! so an unrecognised option cannot be expressed.

use std::fmt;
use std::num::NonZeroUsize;
use std::thread;

/// Default per-stage pool capacity. Large enough to be effectively unbounded.
pub const DEFAULT_POOL_SIZE: usize = 10_000;

/// Worker threads per available core when `max_workers` is left at zero.
pub const WORKERS_PER_CORE: usize = 4;

/// Resolved configuration snapshot for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Maximum concurrent invocations per stage (0 = default).
    pub pool_size: usize,
    /// Maximum worker threads per pool (0 = derived from the core count).
    /// Invocations admitted beyond this wait for a free worker.
    pub max_workers: usize,
    /// Run stages inline in their dispatch loop instead of through a pool.
    pub disable_pool: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            max_workers: 0,
            disable_pool: false,
        }
    }
}

impl Options {
    /// Apply `options` in order and normalise the result.
    pub fn load(options: impl IntoIterator<Item = RunOption>) -> Self {
        let mut resolved = Options::default();
        for option in options {
            option.apply(&mut resolved);
        }
        if resolved.pool_size == 0 {
            resolved.pool_size = DEFAULT_POOL_SIZE;
        }
        resolved
    }

    pub fn pool_enabled(&self) -> bool {
        !self.disable_pool
    }

    /// Worker threads each pool may spawn, never more than `pool_size`.
    pub fn worker_limit(&self) -> usize {
        let limit = match self.max_workers {
            0 => {
                let cores = thread::available_parallelism().map_or(1, NonZeroUsize::get);
                cores * WORKERS_PER_CORE
            }
            n => n,
        };
        limit.clamp(1, self.pool_size.max(1))
    }
}

/// A single option mutating an [`Options`] snapshot.
pub struct RunOption(Box<dyn FnOnce(&mut Options) + Send>);

impl RunOption {
    fn new(apply: impl FnOnce(&mut Options) + Send + 'static) -> Self {
        Self(Box::new(apply))
    }

    fn apply(self, options: &mut Options) {
        (self.0)(options)
    }
}

impl fmt::Debug for RunOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RunOption(..)")
    }
}

/// Replace the whole snapshot with `replacement`.
pub fn with_options(replacement: Options) -> RunOption {
    RunOption::new(move |options| *options = replacement)
}

/// Cap concurrent invocations per stage at `size`.
pub fn with_pool_size(size: usize) -> RunOption {
    RunOption::new(move |options| options.pool_size = size)
}

/// Run every stage inline in its dispatch loop.
pub fn with_disable_pool() -> RunOption {
    RunOption::new(|options| options.disable_pool = true)
}

pub fn with_enable_pool(enable: bool) -> RunOption {
    RunOption::new(move |options| options.disable_pool = !enable)
}

/// Cap the worker threads of every pool at `workers` (0 = core-count based).
pub fn with_max_workers(workers: usize) -> RunOption {
    RunOption::new(move |options| options.max_workers = workers)
}
