//! Capabilities handed to tool code for one invocation.

use super::protocol::{
    FilePayload, SystemVar, ToolOutcome, UploadFile, UploadResult, WorkerMessage,
};
use super::relay::RelayTable;
use crate::tools::error::ToolError;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A file tool code wants stored by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Creates an upload request.
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// Per-invocation view of the sandbox.
///
/// Cheap to clone; every clone writes into the same ordered channel.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    system_var: Arc<SystemVar>,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    relay: Arc<RelayTable>,
}

impl InvocationContext {
    /// Creates a context writing to `outbound` and relaying through `relay`.
    #[must_use]
    pub fn new(
        system_var: SystemVar,
        outbound: mpsc::UnboundedSender<WorkerMessage>,
        relay: Arc<RelayTable>,
    ) -> Self {
        Self {
            system_var: Arc::new(system_var),
            outbound,
            relay,
        }
    }

    /// Ambient variables of this invocation.
    #[must_use]
    pub fn system_var(&self) -> &SystemVar {
        &self.system_var
    }

    fn emit(&self, message: WorkerMessage) -> bool {
        self.outbound.send(message).is_ok()
    }

    /// Emits one progress chunk to the caller.
    pub fn stream_response(&self, chunk: Value) {
        if !self.emit(WorkerMessage::Stream(chunk)) {
            tracing::debug!("Stream chunk dropped, host channel closed");
        }
    }

    /// Forwards console output to the host logger.
    pub fn log(&self, args: Vec<Value>) {
        if !self.emit(WorkerMessage::Log { args }) {
            tracing::debug!("Log line dropped, host channel closed");
        }
    }

    /// Asks the host to store a file and waits for its location.
    ///
    /// # Errors
    ///
    /// Returns a relay error when the host rejects the upload, the host
    /// channel is closed, or no response arrives in time.
    pub async fn upload_file(&self, file: FileUpload) -> Result<UploadResult, ToolError> {
        let payload = FilePayload::from_bytes(file.filename, file.content_type, &file.bytes);
        self.relay
            .call(|id| {
                let sent = self.emit(WorkerMessage::UploadFile(UploadFile { id, file: payload }));
                if sent {
                    Ok(())
                } else {
                    Err(ToolError::relay_failed("host channel closed"))
                }
            })
            .await
    }

    pub(crate) fn finish(&self, outcome: ToolOutcome) {
        if !self.emit(WorkerMessage::Done(outcome)) {
            tracing::warn!("Invocation finished after host channel closed");
        }
    }
}
