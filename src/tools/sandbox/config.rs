//! Sandbox, pool and relay configuration.

use crate::tools::error::ToolError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-invocation wall-clock limit (60 seconds).
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of sandboxes created ahead of demand.
pub const DEFAULT_WARM_COUNT: usize = 2;

/// Default number of idle sandboxes kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 8;

/// Default maximum runs before a sandbox is replaced.
pub const DEFAULT_MAX_EXECUTIONS_BEFORE_RECYCLE: u32 = 100;

/// Default bound on outstanding upload relays per sandbox.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Default time a relay waits for the host's response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Where sandboxes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// A child process per sandbox
    #[default]
    Process,
    /// A tokio task per sandbox, sharing the host's registry
    InProcess,
}

/// Configuration for individual sandboxes.
///
/// ```rust,ignore
/// let config = SandboxConfig::new()
///     .with_mode(SandboxMode::InProcess)
///     .with_invocation_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Process or in-process execution.
    ///
    /// Default: process
    pub mode: SandboxMode,

    /// Wall-clock limit for one invocation, relays included.
    ///
    /// Default: 60 seconds
    pub invocation_timeout: Duration,

    /// Worker executable; `None` re-executes the current binary.
    pub worker_program: Option<PathBuf>,

    /// Arguments passed to the worker executable.
    ///
    /// Default: `["worker"]`
    pub worker_args: Vec<String>,

    /// Address-space limit applied to worker processes, in bytes.
    pub memory_limit: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            worker_program: None,
            worker_args: vec!["worker".to_string()],
            memory_limit: None,
        }
    }
}

impl SandboxConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SandboxMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the invocation timeout.
    #[must_use]
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Sets the worker executable and its arguments.
    #[must_use]
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.worker_program = Some(program.into());
        self.worker_args = args;
        self
    }

    /// Sets the worker address-space limit.
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an internal error naming the offending field.
    pub fn validate(&self) -> Result<(), ToolError> {
        if self.invocation_timeout.is_zero() {
            return Err(ToolError::internal(
                "sandbox.invocation_timeout must be greater than zero",
            ));
        }
        const MIN_MEMORY: u64 = 16 * 1024 * 1024;
        if let Some(limit) = self.memory_limit {
            if limit < MIN_MEMORY {
                return Err(ToolError::internal(format!(
                    "sandbox.memory_limit must be at least 16 MB, got {limit} bytes"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the sandbox pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Sandboxes created when the pool starts.
    ///
    /// Default: 2
    pub warm_count: usize,

    /// Idle sandboxes kept; extras are torn down on release.
    ///
    /// Default: 8
    pub max_idle: usize,

    /// Runs after which a sandbox is replaced.
    ///
    /// Default: 100
    pub max_executions_before_recycle: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            warm_count: DEFAULT_WARM_COUNT,
            max_idle: DEFAULT_MAX_IDLE,
            max_executions_before_recycle: DEFAULT_MAX_EXECUTIONS_BEFORE_RECYCLE,
        }
    }
}

impl PoolConfig {
    /// Creates a pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the warm count.
    #[must_use]
    pub fn with_warm_count(mut self, count: usize) -> Self {
        self.warm_count = count;
        self
    }

    /// Sets the idle bound.
    #[must_use]
    pub fn with_max_idle(mut self, max: usize) -> Self {
        self.max_idle = max;
        self
    }

    /// Sets the recycle threshold.
    #[must_use]
    pub fn with_max_executions_before_recycle(mut self, max: u32) -> Self {
        self.max_executions_before_recycle = max;
        self
    }

    /// Validates the pool configuration.
    ///
    /// # Errors
    ///
    /// Returns an internal error naming the offending field.
    pub fn validate(&self) -> Result<(), ToolError> {
        if self.max_executions_before_recycle == 0 {
            return Err(ToolError::internal(
                "sandbox.max_executions_before_recycle must be greater than zero",
            ));
        }
        if self.warm_count > self.max_idle {
            return Err(ToolError::internal(format!(
                "sandbox.warm_count ({}) exceeds sandbox.max_idle ({})",
                self.warm_count, self.max_idle
            )));
        }
        Ok(())
    }
}

/// Bounds on the worker-side relay table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Outstanding relays allowed at once.
    ///
    /// Default: 64
    pub max_pending: usize,

    /// Time a relay waits for its response before failing.
    ///
    /// Default: 120 seconds
    pub response_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Creates a relay configuration.
    #[must_use]
    pub fn new(max_pending: usize, response_timeout: Duration) -> Self {
        Self {
            max_pending,
            response_timeout,
        }
    }
}
