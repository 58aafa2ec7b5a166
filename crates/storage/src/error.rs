//! Storage Error Types
//!
//! Errors use `exn` for automatic location tracking and error tree
//! construction. Every failure reported by the Drive collaborator is kept as a
//! child of a storage error that names the path and the operation that was
//! attempted.

use derive_more::{Display, Error};
use drivefs_api::error::{Error as ApiError, ErrorKind as ApiErrorKind};

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Filesystem operation that was being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Operation {
    #[display("resolve")]
    Resolve,
    #[display("read")]
    Read,
    #[display("write")]
    Write,
    #[display("delete")]
    Delete,
    #[display("copy")]
    Copy,
    #[display("move")]
    Move,
    #[display("create directory")]
    CreateDirectory,
    #[display("list")]
    List,
    #[display("metadata")]
    Metadata,
    #[display("visibility")]
    Visibility,
}

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Path does not resolve to an object
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("unable to read: {_0}")]
    ReadFailure(#[error(not(source))] String),
    #[display("unable to write: {_0}")]
    WriteFailure(#[error(not(source))] String),
    #[display("unable to delete: {_0}")]
    DeleteFailure(#[error(not(source))] String),
    #[display("unable to create directory: {_0}")]
    CreateDirectoryFailure(#[error(not(source))] String),
    #[display("unable to retrieve metadata: {_0}")]
    MetadataFailure(#[error(not(source))] String),
    #[display("unable to change visibility: {_0}")]
    VisibilityFailure(#[error(not(source))] String),
    #[display("unable to copy {from} to {to}")]
    CopyFailure { from: String, to: String },
    #[display("unable to move {from} to {to}")]
    MoveFailure { from: String, to: String },
    /// The copy succeeded but the source could not be removed, so the object
    /// now exists at both paths.
    #[display("moved {from} to {to} but the source remains")]
    MoveIncomplete { from: String, to: String },
    /// Network, timeout, token or malformed response error
    #[display("transport error during {operation}: {path}")]
    Transport { operation: Operation, path: String },
    #[display("cancelled: {_0}")]
    Cancelled(#[error(not(source))] String),
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// The adapter cannot be built from the given configuration
    #[display("invalid configuration: {_0}")]
    Configuration(#[error(not(source))] String),
}

impl ErrorKind {
    /// The error kind an operation reports when the collaborator refused it.
    pub fn failure(operation: Operation, path: &str) -> Self {
        let path = path.to_string();
        match operation {
            Operation::Resolve | Operation::Metadata | Operation::List => Self::MetadataFailure(path),
            Operation::Read => Self::ReadFailure(path),
            Operation::Write => Self::WriteFailure(path),
            Operation::Delete => Self::DeleteFailure(path),
            Operation::Copy => Self::CopyFailure { from: path.clone(), to: path },
            Operation::Move => Self::MoveFailure { from: path.clone(), to: path },
            Operation::CreateDirectory => Self::CreateDirectoryFailure(path),
            Operation::Visibility => Self::VisibilityFailure(path),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Attach path and operation context to collaborator errors.
pub trait ApiResultExt<T> {
    /// Raise a storage error over the API error: transport problems become
    /// [`ErrorKind::Transport`], a missing object becomes
    /// [`ErrorKind::NotFound`], and anything else becomes the operation's
    /// failure kind.
    fn or_fail(self, operation: Operation, path: &str) -> Result<T>;

    /// Like [`or_fail`](Self::or_fail) but always raises `kind` unless the
    /// failure was a transport problem.
    fn or_fail_with(self, operation: Operation, path: &str, kind: impl FnOnce() -> ErrorKind) -> Result<T>;
}

impl<T> ApiResultExt<T> for std::result::Result<T, ApiError> {
    #[track_caller]
    fn or_fail(self, operation: Operation, path: &str) -> Result<T> {
        self.map_err(|err| {
            let kind = match &*err {
                kind if kind.is_transport() => ErrorKind::Transport {
                    operation,
                    path: path.to_string(),
                },
                ApiErrorKind::NotFound(_) => ErrorKind::NotFound(path.to_string()),
                _ => ErrorKind::failure(operation, path),
            };
            err.raise(kind)
        })
    }

    #[track_caller]
    fn or_fail_with(self, operation: Operation, path: &str, kind: impl FnOnce() -> ErrorKind) -> Result<T> {
        self.map_err(|err| {
            let kind = match err.is_transport() {
                true => ErrorKind::Transport {
                    operation,
                    path: path.to_string(),
                },
                false => kind(),
            };
            err.raise(kind)
        })
    }
}

/// Whether an API error means "the object is not there".
pub(crate) fn is_api_not_found(err: &ApiError) -> bool {
    matches!(&**err, ApiErrorKind::NotFound(_))
}
