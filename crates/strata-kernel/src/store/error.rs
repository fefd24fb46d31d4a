//! Path store error types.

use thiserror::Error;

/// Path store error type.
///
/// Every variant is an expected, caller-facing outcome. None of them leave
/// the store partially mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Path failed normalization, or has the wrong shape for the operation.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Parent directory of the target does not exist.
    #[error("parent directory missing: {0}")]
    ParentMissing(String),

    /// Exact key already has an entry.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Key is absent, or is not the kind of node the operation needs.
    #[error("not found: {0}")]
    NotFound(String),

    /// Non-cascading delete of a directory that still has descendants.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
}

impl StoreError {
    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a ParentMissing error.
    pub fn parent_missing(path: impl Into<String>) -> Self {
        Self::ParentMissing(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }
}

/// Path store result type.
pub type StoreResult<T> = Result<T, StoreError>;
