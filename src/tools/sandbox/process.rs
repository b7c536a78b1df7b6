//! Child-process sandboxes.
//!
//! Each sandbox is a worker process speaking the protocol over its
//! stdin/stdout. Stderr is inherited so worker logs reach the host's
//! terminal. The process is killed when the sandbox is destroyed or
//! dropped.

use super::config::SandboxConfig;
use super::traits::{Sandbox, SandboxFactory, SandboxFactoryFuture, SandboxHandle, TerminateFuture};
use crate::tools::error::ToolError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Environment variable carrying the worker's address-space limit.
pub const MEMORY_LIMIT_ENV: &str = "TOOLBOX_WORKER_MEMORY_LIMIT";

/// Spawns worker processes.
#[derive(Debug, Clone)]
pub struct ProcessSandboxFactory {
    program: PathBuf,
    args: Vec<String>,
    memory_limit: Option<u64>,
}

impl ProcessSandboxFactory {
    /// Creates a factory from configuration.
    ///
    /// Without an explicit worker program the current executable is
    /// re-executed with the configured arguments.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the current executable is unknown.
    pub fn from_config(config: &SandboxConfig) -> Result<Self, ToolError> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()
                .map_err(|e| ToolError::internal(format!("cannot locate worker binary: {e}")))?,
        };
        Ok(Self {
            program,
            args: config.worker_args.clone(),
            memory_limit: config.memory_limit,
        })
    }

    /// Creates a factory running `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            memory_limit: None,
        }
    }

    /// The worker program.
    #[must_use]
    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl SandboxFactory for ProcessSandboxFactory {
    fn create(&self) -> SandboxFactoryFuture {
        let factory = self.clone();
        Box::pin(async move {
            let mut command = Command::new(&factory.program);
            command
                .args(&factory.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true);
            if let Some(limit) = factory.memory_limit {
                command.env(MEMORY_LIMIT_ENV, limit.to_string());
            }

            let mut child = command.spawn().map_err(|e| {
                ToolError::sandbox_fault(format!(
                    "failed to spawn worker '{}': {e}",
                    factory.program.display()
                ))
            })?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| ToolError::sandbox_fault("worker stdin unavailable"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| ToolError::sandbox_fault("worker stdout unavailable"))?;

            tracing::debug!(pid = child.id(), program = %factory.program.display(), "Worker process spawned");
            Ok(Sandbox::new(
                Box::new(stdout),
                Box::new(stdin),
                Box::new(ProcessHandle { child }),
            ))
        })
    }

    fn is_available(&self) -> bool {
        self.program.components().count() == 1 || self.program.exists()
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Owns a worker process.
#[derive(Debug)]
struct ProcessHandle {
    child: Child,
}

impl SandboxHandle for ProcessHandle {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> TerminateFuture<'_> {
        Box::pin(async move {
            if let Err(e) = self.child.kill().await {
                tracing::debug!(error = %e, "Worker process already gone");
            }
        })
    }
}

/// Applies the address-space limit handed down by the host, if any.
///
/// Called by the worker at startup, before any tool code runs.
///
/// # Errors
///
/// Returns an internal error if the limit is malformed or cannot be set.
pub fn apply_memory_limit_from_env() -> Result<Option<u64>, ToolError> {
    let Ok(raw) = std::env::var(MEMORY_LIMIT_ENV) else {
        return Ok(None);
    };
    let limit: u64 = raw
        .parse()
        .map_err(|e| ToolError::internal(format!("invalid {MEMORY_LIMIT_ENV} '{raw}': {e}")))?;
    set_address_space_limit(limit)?;
    Ok(Some(limit))
}

#[cfg(all(unix, feature = "worker-limits"))]
fn set_address_space_limit(limit: u64) -> Result<(), ToolError> {
    rlimit::setrlimit(rlimit::Resource::AS, limit, limit)
        .map_err(|e| ToolError::internal(format!("failed to set address-space limit: {e}")))
}

#[cfg(not(all(unix, feature = "worker-limits")))]
fn set_address_space_limit(limit: u64) -> Result<(), ToolError> {
    tracing::warn!(limit, "Worker memory limits are not supported on this build");
    Ok(())
}
