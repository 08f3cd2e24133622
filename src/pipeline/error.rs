//! Pipeline-specific error types.
//!
//! These describe coordination faults of the engine itself. Failures of a
//! stage function are recorded on the unit instead and never show up here.

use crate::pipeline::id::StageId;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Pipeline not running")]
    NotRunning,

    #[error("Stage {stage:?} already has a successor; chains must be linear")]
    Branching { stage: StageId },

    #[error("Unknown stage {0:?}")]
    UnknownStage(StageId),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel send error")]
    ChannelSend,
}

/// Errors reported by a [`WorkerPool`](crate::pipeline::pool::WorkerPool).
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool '{0}' has been released")]
    Closed(String),

    #[error("Failed to spawn worker for pool '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Error recorded on a unit whose stage function panicked.
#[derive(Error, Debug)]
#[error("Stage '{stage}' panicked: {message}")]
pub struct StagePanic {
    pub stage: String,
    pub message: String,
}

impl StagePanic {
    pub(crate) fn from_payload(stage: &str, payload: &(dyn std::any::Any + Send)) -> Self {
        Self {
            stage: stage.to_string(),
            message: panic_message(payload),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
