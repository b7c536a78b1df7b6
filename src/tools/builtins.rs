//! Handlers shipped with the runtime.
//!
//! Manifests bind to these through `"entry": {"handler": "<name>"}`. The
//! `plugins/builtin/core.json` manifest in this repository exposes all of
//! them as the `core` toolset.

use crate::tools::error::ToolError;
use crate::tools::handler::HandlerTable;
use crate::tools::sandbox::{FileUpload, InvocationContext};
use serde_json::{json, Value};

/// Handler name of [`echo`].
pub const ECHO: &str = "echo";

/// Handler name of [`current_time`].
pub const CURRENT_TIME: &str = "current_time";

/// Handler name of [`save_text`].
pub const SAVE_TEXT: &str = "save_text";

/// A table holding every builtin handler.
#[must_use]
pub fn builtin_handlers() -> HandlerTable {
    HandlerTable::new()
        .with(ECHO, echo)
        .with(CURRENT_TIME, current_time)
        .with(SAVE_TEXT, save_text)
}

/// Returns its input unchanged.
pub async fn echo(input: Value, _ctx: InvocationContext) -> Result<Value, ToolError> {
    Ok(input)
}

/// Reports the invocation time supplied by the host, or the worker's
/// clock when the host sent none.
pub async fn current_time(_input: Value, ctx: InvocationContext) -> Result<Value, ToolError> {
    let time = match ctx.system_var().time.as_str() {
        "" => chrono::Utc::now().to_rfc3339(),
        host => host.to_string(),
    };
    Ok(json!({ "time": time }))
}

/// Stores `content` as a file through the host and returns its location.
///
/// Inputs: `filename`, `content`, optional `contentType` (default
/// `text/plain`).
pub async fn save_text(input: Value, ctx: InvocationContext) -> Result<Value, ToolError> {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    let filename = field("filename")
        .ok_or_else(|| ToolError::validation_failed("filename: Required"))?;
    let content = field("content").unwrap_or_default();
    let content_type = field("contentType").unwrap_or("text/plain");

    ctx.log(vec![json!("saving"), json!(filename), json!(content.len())]);
    let stored = ctx
        .upload_file(FileUpload::new(filename, content_type, content))
        .await?;
    Ok(json!({
        "accessUrl": stored.access_url,
        "objectName": stored.object_name,
    }))
}
