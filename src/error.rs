//! Error types shared by the walker, the planners and the executor.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single planned operation.
///
/// These never abort a plan: the executor records them against the
/// operation that caused them and moves on to the next one.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("no longer exists: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("no free name for {} after {attempts} attempts", path.display())]
    CollisionUnresolvable { path: PathBuf, attempts: usize },

    #[error("destination already exists: {}", path.display())]
    DestinationOccupied { path: PathBuf },

    #[error(
        "retained copy {} is missing, refusing to delete {}",
        retained.display(),
        path.display()
    )]
    RetainedCopyMissing { path: PathBuf, retained: PathBuf },

    #[error("changed since planning: {}", path.display())]
    Stale { path: PathBuf },

    #[error("cross-device move of {} failed: {reason}", from.display())]
    CrossDeviceMove { from: PathBuf, reason: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OpError {
    /// Maps an I/O error on `path` onto the matching operation error kind.
    pub fn from_io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => OpError::NotFound { path },
            io::ErrorKind::PermissionDenied => OpError::PermissionDenied { path },
            _ => OpError::Io { path, source: err },
        }
    }
}

/// Errors that stop a walk before it produces any entry.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
