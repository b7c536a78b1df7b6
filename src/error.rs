//! Crate-level error type.
//!
//! Component errors live next to their components (`ToolError`,
//! `StorageError`, `LoggingError`); `RuntimeError` covers assembling and
//! launching the runtime. No external error crates are used.

use crate::logging::LoggingError;
use crate::tools::ToolError;
use std::fmt;

/// Errors raised while configuring or launching the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    /// The specific error that occurred
    pub kind: RuntimeErrorKind,
}

/// Specific runtime error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Invalid or unreadable configuration
    Configuration {
        /// The setting or file at fault
        field: String,
        /// Why it was rejected
        reason: String,
    },
    /// Logging could not be initialized
    Logging {
        /// Description of the failure
        reason: String,
    },
    /// A runtime component failed to start or run
    LaunchFailed {
        /// Description of the failure
        reason: String,
    },
}

impl RuntimeError {
    /// Creates a new RuntimeError with the given kind.
    #[must_use]
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self { kind }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Configuration {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Creates a launch failed error.
    #[must_use]
    pub fn launch_failed(reason: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::LaunchFailed {
            reason: reason.into(),
        })
    }

    /// Returns true if this error indicates a configuration problem.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self.kind, RuntimeErrorKind::Configuration { .. })
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RuntimeErrorKind::Configuration { field, reason } => {
                write!(f, "configuration error for '{}': {}", field, reason)
            }
            RuntimeErrorKind::Logging { reason } => {
                write!(f, "logging setup failed: {}", reason)
            }
            RuntimeErrorKind::LaunchFailed { reason } => {
                write!(f, "failed to launch runtime: {}", reason)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<LoggingError> for RuntimeError {
    fn from(error: LoggingError) -> Self {
        Self::new(RuntimeErrorKind::Logging {
            reason: error.to_string(),
        })
    }
}

impl From<ToolError> for RuntimeError {
    fn from(error: ToolError) -> Self {
        Self::launch_failed(error.to_string())
    }
}
