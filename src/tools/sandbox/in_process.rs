//! Task-backed sandboxes.
//!
//! Runs the worker loop on a tokio task connected through an in-memory
//! duplex. There is no isolation: tool code shares the host's address
//! space. Useful for development and tests.

use super::traits::{Sandbox, SandboxFactory, SandboxFactoryFuture, SandboxHandle, TerminateFuture};
use super::worker::WorkerRuntime;
use crate::tools::error::ToolError;
use tokio::io::duplex;
use tokio::task::JoinHandle;

/// Default duplex buffer size in bytes.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256 * 1024;

/// Creates sandboxes that run a [`WorkerRuntime`] on a task.
#[derive(Debug, Clone)]
pub struct InProcessSandboxFactory {
    worker: WorkerRuntime,
    buffer: usize,
}

impl InProcessSandboxFactory {
    /// Creates a factory for `worker`.
    #[must_use]
    pub fn new(worker: WorkerRuntime) -> Self {
        Self {
            worker,
            buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }

    /// Sets the duplex buffer size.
    #[must_use]
    pub fn with_buffer(mut self, bytes: usize) -> Self {
        self.buffer = bytes.max(1024);
        self
    }
}

impl SandboxFactory for InProcessSandboxFactory {
    fn create(&self) -> SandboxFactoryFuture {
        let worker = self.worker.clone();
        let buffer = self.buffer;
        Box::pin(async move {
            let (host_side, worker_side) = duplex(buffer);
            let (worker_read, worker_write) = tokio::io::split(worker_side);
            let task = tokio::spawn(async move {
                if let Err(e) = worker.serve(worker_read, worker_write).await {
                    tracing::debug!(error = %e, "In-process worker stopped");
                }
            });
            let (host_read, host_write) = tokio::io::split(host_side);
            Ok::<_, ToolError>(Sandbox::new(
                Box::new(host_read),
                Box::new(host_write),
                Box::new(TaskHandle { task }),
            ))
        })
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}

#[derive(Debug)]
struct TaskHandle {
    task: JoinHandle<()>,
}

impl SandboxHandle for TaskHandle {
    fn is_alive(&mut self) -> bool {
        !self.task.is_finished()
    }

    fn terminate(&mut self) -> TerminateFuture<'_> {
        self.task.abort();
        Box::pin(async move {
            let _ = (&mut self.task).await;
        })
    }
}
