//! Kernel error types.

use std::io;
use std::sync::Arc;

use strata_types::PathError;
use thiserror::Error;

/// Kernel error type.
///
/// `Clone` so a single upstream failure can be handed to every caller that
/// joined a coalesced call. I/O and opaque driver errors sit behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum FsError {
    /// No mounted storage covers the path.
    #[error("no storage mounted for path: {0}")]
    NoStorageForPath(String),

    /// Object does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Expected a file.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Expected a folder.
    #[error("not a folder: {0}")]
    NotAFolder(String),

    /// Storage failed to initialise or is otherwise unhealthy.
    #[error("storage not ready: {mount_path} ({status})")]
    StorageNotReady { mount_path: String, status: String },

    /// No metadata recorded for a path or any ancestor.
    #[error("meta not found: {0}")]
    MetaNotFound(String),

    /// The driver lacks the capability for this operation.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// No constructor registered under this driver name.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// Another storage already owns this mount path.
    #[error("mount path already taken: {0}")]
    MountPathTaken(String),

    /// No storage record with this id.
    #[error("storage not found: {0}")]
    StorageNotFound(u64),

    /// Source and destination live on different storages.
    #[error("cross-storage operation: {src} -> {dst}")]
    CrossStorage { src: String, dst: String },

    /// A file already occupies the path.
    #[error("file exists: {0}")]
    FileExists(String),

    /// The storage refuses uploads.
    #[error("upload not supported: {0}")]
    UploadNotSupported(String),

    /// The operation observed cancellation.
    #[error("canceled")]
    Canceled,

    #[error("task not found: {0}")]
    TaskNotFound(u64),

    #[error("task still running: {0}")]
    TaskRunning(u64),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("config error: {0}")]
    Config(String),

    /// A backend operation failed; `source` is the underlying cause.
    #[error("{op} {path}: {source}")]
    Op {
        op: &'static str,
        path: String,
        source: Box<FsError>,
    },

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Opaque error bubbled up from a driver.
    #[error("driver error: {0}")]
    Driver(Arc<anyhow::Error>),

    #[error("{0}")]
    Other(String),
}

impl FsError {
    pub fn object_not_found(path: impl Into<String>) -> Self {
        Self::ObjectNotFound(path.into())
    }

    pub fn no_storage(path: impl Into<String>) -> Self {
        Self::NoStorageForPath(path.into())
    }

    pub fn not_a_folder(path: impl Into<String>) -> Self {
        Self::NotAFolder(path.into())
    }

    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile(path.into())
    }

    pub fn file_exists(path: impl Into<String>) -> Self {
        Self::FileExists(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Attach the operation and path that failed.
    pub fn wrap(self, op: &'static str, path: impl Into<String>) -> Self {
        Self::Op {
            op,
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any [`FsError::Op`] wrapping.
    pub fn root(&self) -> &FsError {
        let mut err = self;
        while let FsError::Op { source, .. } = err {
            err = source;
        }
        err
    }

    pub fn is_object_not_found(&self) -> bool {
        match self.root() {
            FsError::ObjectNotFound(_) => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.root(), FsError::Canceled)
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<anyhow::Error> for FsError {
    fn from(e: anyhow::Error) -> Self {
        Self::Driver(Arc::new(e))
    }
}

impl From<PathError> for FsError {
    fn from(e: PathError) -> Self {
        Self::InvalidPath(e.to_string())
    }
}

impl From<serde_json::Error> for FsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Kernel result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_looks_through_wrapping() {
        let err = FsError::object_not_found("/a/b")
            .wrap("get", "/a/b")
            .wrap("list", "/a");
        assert!(err.is_object_not_found());
        assert!(matches!(err.root(), FsError::ObjectNotFound(p) if p == "/a/b"));
        assert_eq!(err.to_string(), "list /a: get /a/b: object not found: /a/b");
    }

    #[test]
    fn test_io_not_found_counts_as_object_not_found() {
        let err: FsError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_object_not_found());
    }

    #[test]
    fn test_clone_shares_io_error() {
        let err: FsError = io::Error::other("disk on fire").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
