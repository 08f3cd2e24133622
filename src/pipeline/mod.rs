//! Linear, channel-connected processing pipeline.
//!
//! Units of work flow through an ordered chain of stages. Each stage runs
//! on its own dispatcher thread and, unless pooling is disabled, fans out
//! onto a bounded worker pool. Every unit reaches the result callback
//! exactly once: after the last stage, or straight after the first stage
//! that records an error on it.
//!
//! # Architecture
//!
//! ```text
//! feed ──► [root] ──► [stage 1] ──► [stage 2] ──► sink ──► callback
//!                         │             │           ▲
//!                         └── error ────┴───────────┘
//! ```
//!
//! # Design
//!
//! - **Owned hand-off**: a `Unit` is moved through channels, so its payload
//!   is never shared between stages.
//! - **Stage arena**: stages live in a flat `Vec` with `StageId` as index;
//!   the chain is a single successor link per stage.
//! - **Set-once errors**: the first error recorded on a unit wins.
//! - **Bounded pools**: `WorkerPool` blocks submission when saturated, so
//!   backpressure reaches `feed` through the bounded channels.
//!
//! # Example
//!
//! ```no_run
//! use flowline::pipeline::{with_pool_size, Pipeline, Unit};
//!
//! let mut pipeline = Pipeline::new(16);
//! pipeline
//!     .then(|unit: &mut Unit<String>| unit.payload_mut().push_str(" parsed"))
//!     .then(|unit: &mut Unit<String>| unit.payload_mut().make_ascii_uppercase());
//!
//! pipeline
//!     .run(|unit| println!("{}", unit.payload()), [with_pool_size(4)])
//!     .unwrap();
//! pipeline.feed("record".to_string()).unwrap();
//! pipeline.wait();
//! ```

pub mod chain;
pub mod error;
pub mod executor;
pub mod id;
pub mod options;
pub mod pending;
pub mod pool;
pub mod sink;
pub mod stage;
pub mod unit;

pub use chain::{Chain, StageRef};
pub use error::{PipelineError, PipelineResult, PoolError, StagePanic};
pub use executor::{Pipeline, RunState};
pub use id::{StageId, UnitId};
pub use options::{
    with_disable_pool, with_enable_pool, with_max_workers, with_options, with_pool_size, Options,
    RunOption, DEFAULT_POOL_SIZE, WORKERS_PER_CORE,
};
pub use pending::{PendingCounter, PendingGuard};
pub use pool::{Job, Rejected, WorkerPool};
pub use sink::{PipelineStats, ResultFn};
pub use stage::{compose, sequence, Stage, StageFn};
pub use unit::{SidecarValue, Unit, UNPROCESSED_STEP};
