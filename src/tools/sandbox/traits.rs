//! Sandbox trait definitions.
//!
//! A [`Sandbox`] is the host's end of one worker: an ordered protocol
//! channel plus a [`SandboxHandle`] controlling the execution context
//! behind it. [`SandboxFactory`] implementations decide what that
//! context is (a child process, a tokio task).

use super::protocol::{decode_line, encode_line, HostMessage, RunTool, WorkerMessage};
use crate::tools::error::ToolError;
use crate::types::SandboxId;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

/// Reading half of a sandbox channel.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writing half of a sandbox channel.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Future returned by [`SandboxHandle::terminate`].
pub type TerminateFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// The result type for sandbox factory futures.
pub type SandboxFactoryFuture =
    Pin<Box<dyn Future<Output = Result<Sandbox, ToolError>> + Send + 'static>>;

/// Lifecycle of a sandbox with respect to invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxState {
    /// Spawned, no active run
    Idle,
    /// Processing exactly one `runTool`
    Running,
    /// Posted `done`; may be reset or torn down
    Terminal,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Control over the execution context behind a sandbox.
pub trait SandboxHandle: Send + Debug {
    /// Returns whether the context is still running.
    fn is_alive(&mut self) -> bool;

    /// Forcibly stops the context and waits for it to go away.
    fn terminate(&mut self) -> TerminateFuture<'_>;
}

/// Factory for creating sandbox instances.
///
/// This allows different execution contexts to be plugged in without
/// changing the orchestrator.
pub trait SandboxFactory: Send + Sync + Debug {
    /// Creates a new sandbox in the `Idle` state.
    ///
    /// # Errors
    ///
    /// Returns a sandbox fault if the context cannot be started.
    fn create(&self) -> SandboxFactoryFuture;

    /// Returns whether this factory can create sandboxes here.
    fn is_available(&self) -> bool {
        true
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Host end of one worker.
pub struct Sandbox {
    id: SandboxId,
    state: SandboxState,
    executions: u32,
    writer: BoxedWriter,
    lines: Lines<BufReader<BoxedReader>>,
    handle: Box<dyn SandboxHandle>,
}

impl Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("executions", &self.executions)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Wraps a freshly started context.
    #[must_use]
    pub fn new(reader: BoxedReader, writer: BoxedWriter, handle: Box<dyn SandboxHandle>) -> Self {
        Self {
            id: SandboxId::new(),
            state: SandboxState::Idle,
            executions: 0,
            writer,
            lines: BufReader::new(reader).lines(),
            handle,
        }
    }

    /// The sandbox identity.
    #[must_use]
    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Runs started on this sandbox.
    #[must_use]
    pub fn executions(&self) -> u32 {
        self.executions
    }

    /// Returns whether the context behind the sandbox is running.
    pub fn is_alive(&mut self) -> bool {
        self.handle.is_alive()
    }

    /// Starts an invocation: `Idle` → `Running`.
    ///
    /// # Errors
    ///
    /// Fails when the sandbox is not idle or the message cannot be sent.
    pub async fn start(&mut self, run: RunTool) -> Result<(), ToolError> {
        if self.state != SandboxState::Idle {
            return Err(ToolError::internal(format!(
                "sandbox {} is {}, cannot start a run",
                self.id, self.state
            )));
        }
        self.send(&HostMessage::RunTool(run)).await?;
        self.state = SandboxState::Running;
        self.executions = self.executions.saturating_add(1);
        Ok(())
    }

    /// Writes one message.
    ///
    /// # Errors
    ///
    /// Returns a sandbox fault when the channel is broken.
    pub async fn send(&mut self, message: &HostMessage) -> Result<(), ToolError> {
        let line = encode_line(message)?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolError::sandbox_fault(format!("write to {} failed: {e}", self.id)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ToolError::sandbox_fault(format!("flush to {} failed: {e}", self.id)))
    }

    /// Reads the next message; `done` moves the sandbox to `Terminal`.
    ///
    /// Cancel safe: dropping the future loses no data.
    ///
    /// # Errors
    ///
    /// Returns a sandbox fault on EOF, I/O failure or a malformed line.
    pub async fn recv(&mut self) -> Result<WorkerMessage, ToolError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| ToolError::sandbox_fault(format!("read from {} failed: {e}", self.id)))?
                .ok_or_else(|| ToolError::sandbox_fault(format!("{} exited", self.id)))?;
            if line.trim().is_empty() {
                continue;
            }
            let message: WorkerMessage = decode_line(&line)?;
            if matches!(message, WorkerMessage::Done(_)) {
                self.state = SandboxState::Terminal;
            }
            return Ok(message);
        }
    }

    /// Makes a finished sandbox reusable: `Terminal` → `Idle`.
    ///
    /// Returns false when the sandbox was not terminal.
    pub fn reset(&mut self) -> bool {
        if self.state == SandboxState::Terminal {
            self.state = SandboxState::Idle;
            true
        } else {
            false
        }
    }

    /// Terminates the context behind the sandbox.
    pub async fn destroy(mut self) {
        self.handle.terminate().await;
        tracing::debug!(sandbox_id = %self.id, executions = self.executions, "Sandbox destroyed");
    }
}
