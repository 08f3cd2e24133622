//! # flowline: linear multi-stage processing pipelines
//!
//! Units of work are fed into an ordered chain of stages. Every stage runs
//! on its own thread and fans work out onto a bounded worker pool, and each
//! unit reaches a single result callback exactly once, either after the
//! last stage or right after the first stage that records an error on it.
//!
//! ## Architecture
//!
//! - **Pipeline**: stage arena, per-stage dispatchers and pools, result sink
//! - **Stages**: ready-made stage functions (file-system helpers)
//! - **Config**: pipeline startup settings loaded from JSON or TOML
//! - **Communication**: Crossbeam channels between consecutive stages
//!
//! ## Example
//!
//! ```no_run
//! use flowline::pipeline::{with_disable_pool, Pipeline, Unit};
//!
//! let mut pipeline = Pipeline::new(0);
//! pipeline
//!     .then(|unit: &mut Unit<String>| unit.payload_mut().push('A'))
//!     .then(|unit: &mut Unit<String>| unit.payload_mut().push('B'));
//!
//! pipeline
//!     .run(|unit| assert_eq!(unit.payload(), "AB"), [with_disable_pool()])
//!     .unwrap();
//! pipeline.feed(String::new()).unwrap();
//! pipeline.wait();
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod stages;

// Re-export commonly used types
pub use config::FlowConfig;
pub use error::{FlowError, Result, ResultExt};
pub use pipeline::{Pipeline, PipelineError, Stage, Unit};
