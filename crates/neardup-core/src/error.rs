use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::BatchId;

pub type Result<T> = core::result::Result<T, Error>;

/// Custom error types for the neardup library
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found error
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid configuration, including signatures built with different parameters
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A path could not be resolved safely
    #[error("Path resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// Pre-flight validation of a batch failed; nothing was touched
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// Not enough free space at a move destination
    #[error("Insufficient disk space at {path}: need {required} bytes, {available} available")]
    DiskSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Safety check failure
    #[error("Safety check failed: {0}")]
    SafetyCheck(String),

    #[error("Operation interrupted")]
    Interrupted,
}

/// Why a candidate path could not be turned into a canonical real path.
///
/// Every variant is a per-file, non-fatal condition: the file is excluded from
/// the scan and the reason is logged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResolutionError {
    #[error("symlink cycle detected at {0}")]
    Cycle(PathBuf),

    #[error("symlink chain starting at {path} exceeds {max_depth} hops")]
    TooDeep { path: PathBuf, max_depth: usize },

    #[error("{path} resolves outside base directory {base}")]
    OutsideBase { path: PathBuf, base: PathBuf },

    #[error("broken link or missing target: {0}")]
    Broken(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("not a regular file: {0}")]
    NotRegular(PathBuf),

    #[error("symlink not followed: {0}")]
    NotFollowed(PathBuf),

    #[error("cannot resolve {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

impl ResolutionError {
    /// Map an I/O error on `path` to the matching variant.
    pub(crate) fn from_io(path: PathBuf, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::Broken(path),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io {
                path,
                reason: err.to_string(),
            },
        }
    }
}

/// One target that failed a check, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Batch-level validation failure. Reported as a unit, one entry per failing target.
#[derive(Error, Debug, Clone, Serialize)]
#[error("batch {batch} failed validation:{}", list_failures(.failures))]
pub struct ValidationFailure {
    pub batch: BatchId,
    pub failures: Vec<TargetFailure>,
}

fn list_failures(failures: &[TargetFailure]) -> String {
    let mut out = String::new();
    for failure in failures {
        let _ = write!(out, "\n  {}: {}", failure.path.display(), failure.reason);
    }
    out
}
