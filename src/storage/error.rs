//! Collaborator error types.

use std::fmt;

/// Errors reported by the object store, record store or lock service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError {
    kind: StorageErrorKind,
}

/// Specific storage error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The named object or record does not exist
    NotFound {
        /// Object name or toolId
        name: String,
    },
    /// The backing service could not be reached; retrying may succeed
    Unavailable {
        /// Description of the connection failure
        reason: String,
    },
    /// The operation was rejected or failed permanently
    OperationFailed {
        /// Operation name (`upload`, `download`, ...)
        operation: String,
        /// Reason for failure
        reason: String,
    },
}

impl StorageError {
    /// Creates a new StorageError with the given kind.
    #[must_use]
    pub fn new(kind: StorageErrorKind) -> Self {
        Self { kind }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::NotFound { name: name.into() })
    }

    /// Creates a transient connectivity error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Unavailable {
            reason: reason.into(),
        })
    }

    /// Creates a permanent operation failure.
    #[must_use]
    pub fn operation_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        })
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &StorageErrorKind {
        &self.kind
    }

    /// Returns true if the failure is a connectivity problem worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, StorageErrorKind::Unavailable { .. })
    }

    /// Returns true if the object or record does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, StorageErrorKind::NotFound { .. })
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StorageErrorKind::NotFound { name } => {
                write!(f, "storage object '{}' not found", name)
            }
            StorageErrorKind::Unavailable { reason } => {
                write!(f, "storage backend unavailable: {}; will retry", reason)
            }
            StorageErrorKind::OperationFailed { operation, reason } => {
                write!(f, "storage {} failed: {}", operation, reason)
            }
        }
    }
}

impl std::error::Error for StorageError {}
