//! File-system stages
//!
//! These stages work on an [`FsPayload`], a tagged payload that can hold a
//! single path, a list of paths, open files, sizes or extensions. A stage
//! that receives a variant it cannot handle records
//! [`FsStageError::UnexpectedPayload`] on the unit. A stage that ends up
//! with nothing to hand on records [`FsStageError::Empty`].
//!
//! # Example
//!
//! ```ignore
//! use flowline::pipeline::Pipeline;
//! use flowline::stages::fs::{all_files, file_sizes, open_files, FsPayload};
//! use std::fs::OpenOptions;
//!
//! let mut pipeline = Pipeline::new(16);
//! pipeline
//!     .then(all_files(".log"))
//!     .then(open_files(OpenOptions::new().read(true).clone()))
//!     .then(file_sizes());
//! ```

use crate::pipeline::Unit;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Payload understood by the file-system stages
#[derive(Debug)]
pub enum FsPayload {
    Path(PathBuf),
    Paths(Vec<PathBuf>),
    Files(Vec<OpenedFile>),
    Sizes(Vec<FileSize>),
    Extensions(Vec<String>),
}

impl FsPayload {
    /// Variant name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            FsPayload::Path(_) => "path",
            FsPayload::Paths(_) => "paths",
            FsPayload::Files(_) => "files",
            FsPayload::Sizes(_) => "sizes",
            FsPayload::Extensions(_) => "extensions",
        }
    }

    /// Paths held by a `Path` or `Paths` payload
    pub fn paths(&self) -> Option<Vec<&Path>> {
        match self {
            FsPayload::Path(path) => Some(vec![path.as_path()]),
            FsPayload::Paths(paths) => Some(paths.iter().map(PathBuf::as_path).collect()),
            _ => None,
        }
    }
}

impl From<PathBuf> for FsPayload {
    fn from(path: PathBuf) -> Self {
        FsPayload::Path(path)
    }
}

impl From<&str> for FsPayload {
    fn from(path: &str) -> Self {
        FsPayload::Path(PathBuf::from(path))
    }
}

impl From<Vec<PathBuf>> for FsPayload {
    fn from(paths: Vec<PathBuf>) -> Self {
        FsPayload::Paths(paths)
    }
}

/// A file handle together with the path it was opened from
#[derive(Debug)]
pub struct OpenedFile {
    pub path: PathBuf,
    pub file: File,
}

/// Number of bytes read from one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSize {
    pub path: PathBuf,
    pub size: u64,
}

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{path: {}, size: {}}}", self.path.display(), self.size)
    }
}

/// Errors recorded on a unit by the file-system stages
#[derive(Error, Debug)]
pub enum FsStageError {
    #[error("{stage}: cannot handle a {found} payload")]
    UnexpectedPayload {
        stage: &'static str,
        found: &'static str,
    },

    #[error("{stage}: no results")]
    Empty { stage: &'static str },

    #[error("{stage}: cannot read {path:?}: {source}")]
    Io {
        stage: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn unexpected(stage: &'static str, payload: &FsPayload) -> FsStageError {
    FsStageError::UnexpectedPayload {
        stage,
        found: payload.kind(),
    }
}

/// Whether `path` ends in the extension `suffix`, ignoring case and any leading dot
fn has_suffix(path: &Path, suffix: &str) -> bool {
    let wanted = suffix.trim_start_matches('.');
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

fn collect_files(root: &Path, suffix: &str) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed")));
            }
            Err(err) => {
                tracing::debug!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        if entry.file_type().is_file() && has_suffix(entry.path(), suffix) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Replace a directory path with every file below it whose extension matches `suffix`.
///
/// The root directory must be readable; unreadable subdirectories are
/// skipped. An empty match list is not an error.
pub fn all_files(suffix: impl Into<String>) -> impl Fn(&mut Unit<FsPayload>) + Send + Sync + 'static {
    const STAGE: &str = "all_files";
    let suffix = suffix.into();
    move |unit: &mut Unit<FsPayload>| {
        let root = match unit.payload() {
            FsPayload::Path(root) => root.clone(),
            other => {
                unit.set_err(unexpected(STAGE, other));
                return;
            }
        };
        match collect_files(&root, &suffix) {
            Ok(files) => {
                tracing::debug!("Found {} *{} files under {:?}", files.len(), suffix, root);
                unit.set_payload(FsPayload::Paths(files));
            }
            Err(source) => {
                unit.set_err(FsStageError::Io {
                    stage: STAGE,
                    path: root,
                    source,
                });
            }
        }
    }
}

/// Open every path with `options`. Paths that fail to open are dropped.
pub fn open_files(options: OpenOptions) -> impl Fn(&mut Unit<FsPayload>) + Send + Sync + 'static {
    const STAGE: &str = "open_files";
    move |unit: &mut Unit<FsPayload>| {
        let opened: Vec<OpenedFile> = match unit.payload().paths() {
            Some(paths) => paths
                .into_iter()
                .filter_map(|path| match options.open(path) {
                    Ok(file) => Some(OpenedFile {
                        path: path.to_path_buf(),
                        file,
                    }),
                    Err(err) => {
                        tracing::debug!("Cannot open {:?}: {}", path, err);
                        None
                    }
                })
                .collect(),
            None => {
                let err = unexpected(STAGE, unit.payload());
                unit.set_err(err);
                return;
            }
        };
        if opened.is_empty() {
            unit.set_err(FsStageError::Empty { stage: STAGE });
        } else {
            unit.set_payload(FsPayload::Files(opened));
        }
    }
}

/// Create every path as a directory, parents included. Paths that fail are dropped.
pub fn make_dirs() -> impl Fn(&mut Unit<FsPayload>) + Send + Sync + 'static {
    const STAGE: &str = "make_dirs";
    move |unit: &mut Unit<FsPayload>| {
        let created: Vec<PathBuf> = match unit.payload().paths() {
            Some(paths) => paths
                .into_iter()
                .filter(|path| match std::fs::create_dir_all(path) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::debug!("Cannot create {:?}: {}", path, err);
                        false
                    }
                })
                .map(Path::to_path_buf)
                .collect(),
            None => {
                let err = unexpected(STAGE, unit.payload());
                unit.set_err(err);
                return;
            }
        };
        if created.is_empty() {
            unit.set_err(FsStageError::Empty { stage: STAGE });
        } else {
            unit.set_payload(FsPayload::Paths(created));
        }
    }
}

/// Read every open file to the end and record how many bytes it held.
pub fn file_sizes() -> impl Fn(&mut Unit<FsPayload>) + Send + Sync + 'static {
    const STAGE: &str = "file_sizes";
    move |unit: &mut Unit<FsPayload>| {
        let sizes: Vec<FileSize> = match unit.payload_mut() {
            FsPayload::Files(files) => files
                .iter_mut()
                .filter_map(|opened| match io::copy(&mut opened.file, &mut io::sink()) {
                    Ok(size) => Some(FileSize {
                        path: opened.path.clone(),
                        size,
                    }),
                    Err(err) => {
                        tracing::debug!("Cannot read {:?}: {}", opened.path, err);
                        None
                    }
                })
                .collect(),
            other => {
                let err = unexpected(STAGE, other);
                unit.set_err(err);
                return;
            }
        };
        if sizes.is_empty() {
            unit.set_err(FsStageError::Empty { stage: STAGE });
        } else {
            unit.set_payload(FsPayload::Sizes(sizes));
        }
    }
}

/// Replace paths with their extensions, dot included (`""` when there is none).
pub fn extensions() -> impl Fn(&mut Unit<FsPayload>) + Send + Sync + 'static {
    const STAGE: &str = "extensions";
    move |unit: &mut Unit<FsPayload>| {
        let exts: Vec<String> = match unit.payload().paths() {
            Some(paths) => paths
                .into_iter()
                .map(|path| {
                    path.extension()
                        .map(|ext| format!(".{}", ext.to_string_lossy()))
                        .unwrap_or_default()
                })
                .collect(),
            None => {
                let err = unexpected(STAGE, unit.payload());
                unit.set_err(err);
                return;
            }
        };
        if exts.is_empty() {
            unit.set_err(FsStageError::Empty { stage: STAGE });
        } else {
            unit.set_payload(FsPayload::Extensions(exts));
        }
    }
}
