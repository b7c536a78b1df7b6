//! Tool error types.
//!
//! Errors raised while loading tool modules, validating invocation
//! payloads, relaying capability requests and driving sandboxes.

use crate::storage::StorageError;
use crate::types::RequestId;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in tool operations.
///
/// The kind is boxed to keep `Result<_, ToolError>` small.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    /// Relay request this error belongs to, if any
    pub request_id: Option<RequestId>,
    kind: Box<ToolErrorKind>,
}

/// Specific tool error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// No descriptor with this toolId is registered
    NotFound {
        /// The requested toolId
        tool_id: String,
    },
    /// The toolId names a toolset, which is not callable
    NotCallable {
        /// The toolset's toolId
        tool_id: String,
    },
    /// A tool module could not be loaded or parsed
    ModuleLoad {
        /// Module file path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
    /// Input or output failed schema validation
    ValidationFailed {
        /// Flattened `<field.path>: <message>` text
        message: String,
    },
    /// The tool callback reported a failure
    ExecutionFailed {
        /// The toolId
        tool_id: String,
        /// Reason for failure
        reason: String,
    },
    /// A capability relay was rejected or never answered
    RelayFailed {
        /// Reason reported by the host or the relay table
        reason: String,
    },
    /// The sandbox crashed, closed its channel or broke the protocol
    SandboxFault {
        /// Description of the fault
        reason: String,
    },
    /// The invocation exceeded its wall-clock budget
    Timeout {
        /// The toolId
        tool_id: String,
        /// The budget that was exceeded
        duration: Duration,
    },
    /// A collaborator (object store, record store, lock) failed
    Storage {
        /// The underlying storage error
        source: StorageError,
    },
    /// Internal error
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl ToolError {
    /// Creates a new ToolError with the given kind.
    #[must_use]
    pub fn new(kind: ToolErrorKind) -> Self {
        Self {
            request_id: None,
            kind: Box::new(kind),
        }
    }

    /// Attaches the relay request id this error belongs to.
    #[must_use]
    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &ToolErrorKind {
        &self.kind
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(tool_id: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound {
            tool_id: tool_id.into(),
        })
    }

    /// Creates an error for invoking a toolset.
    #[must_use]
    pub fn not_callable(tool_id: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotCallable {
            tool_id: tool_id.into(),
        })
    }

    /// Creates a module load error.
    #[must_use]
    pub fn module_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ModuleLoad {
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// Creates a validation error from an already flattened message.
    #[must_use]
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ValidationFailed {
            message: message.into(),
        })
    }

    /// Creates an execution failed error.
    #[must_use]
    pub fn execution_failed(tool_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ExecutionFailed {
            tool_id: tool_id.into(),
            reason: reason.into(),
        })
    }

    /// Creates a relay failure.
    #[must_use]
    pub fn relay_failed(reason: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::RelayFailed {
            reason: reason.into(),
        })
    }

    /// Creates a sandbox fault.
    #[must_use]
    pub fn sandbox_fault(reason: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::SandboxFault {
            reason: reason.into(),
        })
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(tool_id: impl Into<String>, duration: Duration) -> Self {
        Self::new(ToolErrorKind::Timeout {
            tool_id: tool_id.into(),
            duration,
        })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal {
            message: message.into(),
        })
    }

    /// Returns true if this error indicates the tool was not found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(*self.kind, ToolErrorKind::NotFound { .. })
    }

    /// Returns true for crash or timeout of the execution context.
    #[must_use]
    pub fn is_sandbox_fault(&self) -> bool {
        matches!(
            *self.kind,
            ToolErrorKind::SandboxFault { .. } | ToolErrorKind::Timeout { .. }
        )
    }

    /// Returns true for schema validation failures.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(*self.kind, ToolErrorKind::ValidationFailed { .. })
    }
}

impl From<StorageError> for ToolError {
    fn from(source: StorageError) -> Self {
        Self::new(ToolErrorKind::Storage { source })
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref request_id) = self.request_id {
            write!(f, "[{}] ", request_id)?;
        }

        match self.kind.as_ref() {
            ToolErrorKind::NotFound { tool_id } => {
                write!(f, "Tool with ID {} not found", tool_id)
            }
            ToolErrorKind::NotCallable { tool_id } => {
                write!(f, "Tool with ID {} is a toolset and cannot be run", tool_id)
            }
            ToolErrorKind::ModuleLoad { path, reason } => {
                write!(
                    f,
                    "failed to load tool module '{}': {}",
                    path.display(),
                    reason
                )
            }
            ToolErrorKind::ValidationFailed { message } => write!(f, "{}", message),
            ToolErrorKind::ExecutionFailed { tool_id, reason } => {
                write!(f, "tool '{}' execution failed: {}", tool_id, reason)
            }
            ToolErrorKind::RelayFailed { reason } => {
                write!(f, "upload relay failed: {}", reason)
            }
            ToolErrorKind::SandboxFault { reason } => {
                write!(f, "sandbox fault: {}", reason)
            }
            ToolErrorKind::Timeout { tool_id, duration } => {
                write!(
                    f,
                    "tool '{}' timed out after {} ms",
                    tool_id,
                    duration.as_millis()
                )
            }
            ToolErrorKind::Storage { source } => write!(f, "{}", source),
            ToolErrorKind::Internal { message } => {
                write!(f, "internal tool error: {}", message)
            }
        }
    }
}

impl std::error::Error for ToolError {}
