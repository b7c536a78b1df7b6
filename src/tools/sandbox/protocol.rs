//! Host ↔ worker wire protocol.
//!
//! Every message is one line of JSON shaped `{"type": ..., "data": ...}`.
//! Both directions share one ordered byte stream, so stream chunks and
//! relay requests arrive in the order they were emitted.

use crate::tools::error::ToolError;
use crate::types::RequestId;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The user an invocation runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
}

/// The calling application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: String,
    pub name: String,
}

/// The tool being run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolInfo {
    pub id: String,
    pub version: String,
}

/// Ambient variables handed to every tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemVar {
    pub user: UserInfo,
    pub app: AppInfo,
    pub tool: ToolInfo,
    /// Wall-clock time of the request, as the host formatted it
    pub time: String,
}

/// Starts one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTool {
    pub tool_id: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub system_var: SystemVar,
    /// Module file to load the tool from instead of the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub dev: bool,
}

/// A file a tool asks the host to store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded content
    pub data: String,
}

impl FilePayload {
    /// Encodes raw bytes for the wire.
    #[must_use]
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: BASE64.encode(bytes),
        }
    }

    /// Decodes the content.
    ///
    /// # Errors
    ///
    /// Returns a relay error when `data` is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, ToolError> {
        BASE64
            .decode(&self.data)
            .map_err(|e| ToolError::relay_failed(format!("invalid file data: {e}")))
    }
}

/// Where the host stored an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub access_url: String,
    pub object_name: String,
}

/// Host reply to an `uploadFile` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFileResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<UploadResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadFileResponse {
    /// A successful reply.
    #[must_use]
    pub fn success(id: RequestId, data: UploadResult) -> Self {
        Self {
            id,
            data: Some(data),
            error: None,
        }
    }

    /// A failed reply.
    #[must_use]
    pub fn failure(id: RequestId, error: impl Into<String>) -> Self {
        Self {
            id,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Collapses the reply into a result.
    pub fn into_result(self) -> Result<UploadResult, String> {
        match (self.data, self.error) {
            (_, Some(error)) => Err(error),
            (Some(data), None) => Ok(data),
            (None, None) => Err("upload response carried neither data nor error".to_string()),
        }
    }
}

/// A privileged upload requested by tool code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    pub id: RequestId,
    pub file: FilePayload,
}

/// Terminal result of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutcome {
    /// The validated output
    Output {
        /// Output value
        output: Value,
    },
    /// A flattened error message
    Error {
        /// Error message
        error: String,
    },
}

impl ToolOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn output(output: Value) -> Self {
        Self::Output { output }
    }

    /// A failed outcome.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Returns true for failed outcomes.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The error message, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { error } => Some(error),
            Self::Output { .. } => None,
        }
    }
}

impl From<Result<Value, ToolError>> for ToolOutcome {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(output) => Self::output(output),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Messages the host sends to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum HostMessage {
    RunTool(RunTool),
    UploadFileResponse(UploadFileResponse),
}

/// Messages a worker sends to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkerMessage {
    UploadFile(UploadFile),
    Log {
        args: Vec<Value>,
    },
    Stream(Value),
    Done(ToolOutcome),
}

/// Serializes a message as one protocol line, newline included.
///
/// # Errors
///
/// Returns a sandbox fault if the message cannot be serialized.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ToolError> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| ToolError::sandbox_fault(format!("failed to encode message: {e}")))?;
    line.push('\n');
    Ok(line)
}

/// Parses one protocol line.
///
/// # Errors
///
/// Returns a sandbox fault for malformed lines.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ToolError> {
    serde_json::from_str(line.trim_end())
        .map_err(|e| ToolError::sandbox_fault(format!("malformed message: {e}")))
}
