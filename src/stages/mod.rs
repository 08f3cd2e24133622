//! Ready-made stage functions
//!
//! Each helper returns a closure suitable for `Pipeline::then`. Helpers
//! never fail the pipeline; a problem is recorded on the unit and the unit
//! goes straight to the result callback.

pub mod fs;

pub use fs::{
    all_files, extensions, file_sizes, make_dirs, open_files, FileSize, FsPayload, FsStageError,
    OpenedFile,
};
