//! Error taxonomy for the virtual filesystem layer.
//!
//! Protocol front ends only special-case [`FsError::NotFound`]; every other
//! variant is surfaced to clients as a generic failure. The remaining variants
//! exist so that library callers (and tests) can tell the conditions apart.

use std::io;

use thiserror::Error;

/// The kind of entry expected at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular (possibly coordinated) file.
    File,
    /// A directory.
    Dir,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File => f.write_str("file"),
            EntryKind::Dir => f.write_str("directory"),
        }
    }
}

/// Errors produced by [`Fs`](crate::Fs) implementations and the in-memory primitives.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not exist.
    #[error("file does not exist: {0}")]
    NotFound(String),

    /// The path exists but names the wrong kind of entry.
    #[error("{path}: not a {expected}")]
    WrongKind {
        /// The path (or segment) that was resolved.
        path: String,
        /// What the caller asked for.
        expected: EntryKind,
    },

    /// Negative offset, negative seek position, or another rejected argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A buffer copy came up short. Indicates a bug, never user input.
    #[error("internal consistency violated: {0}")]
    Internal(String),

    /// Error reported by the coordination task of a commit/discard file.
    #[error("coordinator: {0}")]
    Coordinator(#[source] anyhow::Error),

    /// The coordination task of a commit/discard file has gone away.
    #[error("coordinator is no longer running")]
    CoordinatorGone,

    /// Creating an entry collided with an existing entry of the other kind.
    #[error("{path} already exists as a {kind}")]
    Exists {
        /// The colliding path.
        path: String,
        /// The kind of the entry that is already there.
        kind: EntryKind,
    },

    /// The backing object does not support the operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// IO error from a disk-backed source.
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl FsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        FsError::NotFound(path.into())
    }

    pub fn wrong_kind(path: impl Into<String>, expected: EntryKind) -> Self {
        FsError::WrongKind {
            path: path.into(),
            expected,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        FsError::InvalidArgument(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        FsError::Unsupported(msg.into())
    }

    /// Returns true for the one condition protocol adapters distinguish.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(e.to_string())
        } else {
            FsError::Io(e)
        }
    }
}

impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match &e {
            FsError::NotFound(_) => io::ErrorKind::NotFound,
            FsError::WrongKind { expected: EntryKind::Dir, .. } => io::ErrorKind::NotADirectory,
            FsError::WrongKind { expected: EntryKind::File, .. } => io::ErrorKind::IsADirectory,
            FsError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            FsError::Exists { .. } => io::ErrorKind::AlreadyExists,
            FsError::Unsupported(_) => io::ErrorKind::Unsupported,
            FsError::CoordinatorGone => io::ErrorKind::BrokenPipe,
            FsError::Io(inner) => inner.kind(),
            FsError::Internal(_) | FsError::Coordinator(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_folds_into_not_found() {
        let e: FsError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(e.is_not_found());

        let e: FsError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(!e.is_not_found());
        assert!(matches!(e, FsError::Io(_)));
    }

    #[test]
    fn test_fs_error_to_io_error() {
        let e: io::Error = FsError::not_found("/x").into();
        assert_eq!(e.kind(), io::ErrorKind::NotFound);

        let e: io::Error = FsError::invalid("negative offset").into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);

        let e: io::Error = FsError::wrong_kind("/a", EntryKind::Dir).into();
        assert_eq!(e.kind(), io::ErrorKind::NotADirectory);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            FsError::wrong_kind("/a/b", EntryKind::Dir).to_string(),
            "/a/b: not a directory"
        );
        let e = FsError::Exists {
            path: "adir".into(),
            kind: EntryKind::Dir,
        };
        assert_eq!(e.to_string(), "adir already exists as a directory");
    }
}
