//! Worker side of the sandbox.
//!
//! `WorkerRuntime::serve` owns the receive loop of one sandbox. Each
//! `runTool` runs in its own task, so while tool code awaits a relay the
//! loop keeps reading and routes `uploadFileResponse`s to the relay table.
//! Every invocation ends with exactly one `done`, including when the
//! handler fails validation, returns an error or panics.

use super::config::RelayConfig;
use super::context::InvocationContext;
use super::protocol::{decode_line, encode_line, HostMessage, RunTool, ToolOutcome, WorkerMessage};
use super::relay::RelayTable;
use crate::tools::definition::{Descriptor, ToolDescriptor};
use crate::tools::error::ToolError;
use crate::tools::handler::HandlerTable;
use crate::tools::registry::ToolRegistry;
use crate::tools::schema::{validate_input, validate_output};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

/// Aborts a spawned handler when its invocation is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Executes tool invocations received over a protocol stream.
#[derive(Debug, Clone)]
pub struct WorkerRuntime {
    registry: Arc<ToolRegistry>,
    handlers: Arc<HandlerTable>,
    relay_config: RelayConfig,
}

impl WorkerRuntime {
    /// Creates a worker resolving tools through `registry`.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, handlers: Arc<HandlerTable>, relay_config: RelayConfig) -> Self {
        Self {
            registry,
            handlers,
            relay_config,
        }
    }

    /// Serves one host connection until its input closes.
    ///
    /// # Errors
    ///
    /// Returns a sandbox fault when the input cannot be read or output
    /// cannot be written.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), ToolError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, mut queue) = mpsc::unbounded_channel::<WorkerMessage>();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = queue.recv().await {
                let line = encode_line(&message)?;
                writer
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| ToolError::sandbox_fault(format!("write failed: {e}")))?;
                writer
                    .flush()
                    .await
                    .map_err(|e| ToolError::sandbox_fault(format!("flush failed: {e}")))?;
            }
            Ok::<_, ToolError>(())
        });

        let relay = Arc::new(RelayTable::new(self.relay_config));
        let mut lines = BufReader::new(reader).lines();
        let mut runs = JoinSet::new();
        let mut read_error = None;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match decode_line::<HostMessage>(&line) {
                        Ok(HostMessage::RunTool(run)) => {
                            let ctx = InvocationContext::new(
                                run.system_var.clone(),
                                outbound.clone(),
                                relay.clone(),
                            );
                            let worker = self.clone();
                            runs.spawn(async move { worker.run_tool(run, ctx).await });
                        }
                        Ok(HostMessage::UploadFileResponse(response)) => {
                            relay.resolve(response);
                        }
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed host message"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        read_error = Some(ToolError::sandbox_fault(format!("read failed: {e}")));
                        break;
                    }
                },
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Invocation task failed");
                    }
                }
            }
        }

        // Host closed the channel: nothing can receive further output.
        runs.shutdown().await;
        drop(outbound);
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(ToolError::sandbox_fault(format!("writer task failed: {e}"))),
        }
        read_error.map_or(Ok(()), Err)
    }

    async fn run_tool(&self, run: RunTool, ctx: InvocationContext) {
        let tool_id = run.tool_id.clone();
        let span = tracing::info_span!("invocation", tool_id = %tool_id, dev = run.dev);

        let outcome = ToolOutcome::from(self.invoke(run, ctx.clone()).instrument(span).await);
        if let Some(error) = outcome.error_message() {
            tracing::debug!(tool_id = %tool_id, error, "Invocation failed");
        }
        ctx.finish(outcome);
    }

    async fn resolve(&self, run: &RunTool) -> Result<ToolDescriptor, ToolError> {
        let found = match &run.filename {
            Some(filename) => self
                .registry
                .loader()
                .load_tool_module(Path::new(filename))
                .await
                .into_iter()
                .find(|d| d.tool_id() == run.tool_id),
            None => self.registry.get_tool(&run.tool_id),
        };
        match found {
            Some(Descriptor::Tool(tool)) => Ok(tool),
            Some(Descriptor::ToolSet(_)) => Err(ToolError::not_callable(&run.tool_id)),
            None => Err(ToolError::not_found(&run.tool_id)),
        }
    }

    async fn invoke(&self, run: RunTool, ctx: InvocationContext) -> Result<serde_json::Value, ToolError> {
        let tool = self.resolve(&run).await?;
        let version = tool.current_version().ok_or_else(|| {
            ToolError::execution_failed(&tool.meta.tool_id, "tool declares no versions")
        })?;

        let input = validate_input(version, &run.inputs)
            .map_err(|v| ToolError::validation_failed(v.to_string()))?;
        let handler = self.handlers.resolve(&tool)?;

        let mut call = AbortOnDrop(tokio::spawn(handler.call(input, ctx)));
        let output = match (&mut call.0).await {
            Ok(result) => result?,
            Err(e) if e.is_panic() => {
                return Err(ToolError::execution_failed(&tool.meta.tool_id, "handler panicked"));
            }
            Err(_) => {
                return Err(ToolError::execution_failed(&tool.meta.tool_id, "handler cancelled"));
            }
        };

        validate_output(version, &output).map_err(|v| ToolError::validation_failed(v.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::loader::ModuleLoader;
    use crate::tools::registry::RegistryConfig;
    use crate::tools::sandbox::context::FileUpload;
    use crate::tools::sandbox::protocol::{SystemVar, UploadFileResponse, UploadResult};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream, Lines, ReadHalf, WriteHalf};

    const MANIFEST: &str = r#"{
        "toolId": "kit",
        "name": "Kit",
        "children": [
            {"toolId": "kit/echo", "name": "Echo", "entry": {"handler": "echo"},
             "versionList": [{"value": "1",
                "inputs": [{"key": "text", "valueType": "string", "required": true}],
                "outputs": [{"key": "text", "valueType": "string", "required": true}]}]},
            {"toolId": "kit/save", "name": "Save", "entry": {"handler": "save"},
             "versionList": [{"value": "1"}]},
            {"toolId": "kit/boom", "name": "Boom", "entry": {"handler": "boom"},
             "versionList": [{"value": "1"}]}
        ]
    }"#;

    async fn start() -> (
        TempDir,
        WriteHalf<DuplexStream>,
        Lines<BufReader<ReadHalf<DuplexStream>>>,
    ) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("kit.json"), MANIFEST).unwrap();
        let registry = Arc::new(ToolRegistry::new(
            RegistryConfig::new(dir.path(), dir.path().join("uploaded")),
            Arc::new(ModuleLoader::default()),
        ));
        registry.refresh_builtins().await;

        let handlers = HandlerTable::new()
            .with("echo", |input: Value, ctx: InvocationContext| async move {
                ctx.stream_response(json!("working"));
                Ok::<_, ToolError>(input)
            })
            .with("save", |_input: Value, ctx: InvocationContext| async move {
                let stored = ctx
                    .upload_file(FileUpload::new("out.txt", "text/plain", "data"))
                    .await?;
                Ok::<_, ToolError>(json!({"url": stored.access_url}))
            })
            .with("boom", |_input: Value, _ctx: InvocationContext| async move {
                if true {
                    panic!("handler bug");
                }
                Ok::<_, ToolError>(Value::Null)
            });

        let worker = WorkerRuntime::new(registry, Arc::new(handlers), RelayConfig::default());
        let (host_side, worker_side) = duplex(64 * 1024);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        tokio::spawn(async move { worker.serve(worker_read, worker_write).await });

        let (host_read, host_write) = tokio::io::split(host_side);
        (dir, host_write, BufReader::new(host_read).lines())
    }

    fn run(tool_id: &str, inputs: Value) -> String {
        encode_line(&HostMessage::RunTool(RunTool {
            tool_id: tool_id.to_string(),
            inputs,
            system_var: SystemVar::default(),
            filename: None,
            dev: false,
        }))
        .unwrap()
    }

    async fn next(lines: &mut Lines<BufReader<ReadHalf<DuplexStream>>>) -> WorkerMessage {
        let line = lines.next_line().await.unwrap().unwrap();
        decode_line(&line).unwrap()
    }

    #[tokio::test]
    async fn run_streams_then_finishes() {
        let (_dir, mut host, mut lines) = start().await;
        host.write_all(run("kit/echo", json!({"text": "hi", "extra": 1})).as_bytes())
            .await
            .unwrap();

        assert_eq!(next(&mut lines).await, WorkerMessage::Stream(json!("working")));
        assert_eq!(
            next(&mut lines).await,
            WorkerMessage::Done(ToolOutcome::output(json!({"text": "hi"})))
        );
    }

    #[tokio::test]
    async fn unknown_tool_and_toolset_are_errors() {
        let (_dir, mut host, mut lines) = start().await;
        host.write_all(run("missing", json!({})).as_bytes()).await.unwrap();
        assert_eq!(
            next(&mut lines).await,
            WorkerMessage::Done(ToolOutcome::error("Tool with ID missing not found"))
        );

        host.write_all(run("kit", json!({})).as_bytes()).await.unwrap();
        assert_eq!(
            next(&mut lines).await,
            WorkerMessage::Done(ToolOutcome::error(
                "Tool with ID kit is a toolset and cannot be run"
            ))
        );
    }

    #[tokio::test]
    async fn invalid_input_is_reported_not_thrown() {
        let (_dir, mut host, mut lines) = start().await;
        host.write_all(run("kit/echo", json!({"text": 5})).as_bytes())
            .await
            .unwrap();
        assert_eq!(
            next(&mut lines).await,
            WorkerMessage::Done(ToolOutcome::error("text: Expected string, received number"))
        );
    }

    #[tokio::test]
    async fn upload_relays_through_the_host() {
        let (_dir, mut host, mut lines) = start().await;
        host.write_all(run("kit/save", json!({})).as_bytes()).await.unwrap();

        let WorkerMessage::UploadFile(request) = next(&mut lines).await else {
            panic!("expected an upload request");
        };
        assert_eq!(request.file.filename, "out.txt");

        let reply = HostMessage::UploadFileResponse(UploadFileResponse::success(
            request.id,
            UploadResult {
                access_url: "https://cdn.example/out.txt".to_string(),
                object_name: "out.txt".to_string(),
            },
        ));
        host.write_all(encode_line(&reply).unwrap().as_bytes())
            .await
            .unwrap();

        assert_eq!(
            next(&mut lines).await,
            WorkerMessage::Done(ToolOutcome::output(json!({"url": "https://cdn.example/out.txt"})))
        );
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let (_dir, mut host, mut lines) = start().await;
        host.write_all(run("kit/boom", json!({})).as_bytes()).await.unwrap();
        let WorkerMessage::Done(outcome) = next(&mut lines).await else {
            panic!("expected done");
        };
        assert!(outcome.error_message().unwrap().contains("handler panicked"));
    }

    #[tokio::test]
    async fn filename_loads_module_directly() {
        let (dir, mut host, mut lines) = start().await;
        let other = dir.path().join("other");
        std::fs::create_dir_all(&other).unwrap();
        let path = other.join("solo.json");
        std::fs::write(
            &path,
            r#"{"toolId": "solo", "name": "Solo", "entry": {"handler": "echo"},
                "versionList": [{"value": "1"}]}"#,
        )
        .unwrap();

        let message = HostMessage::RunTool(RunTool {
            tool_id: "solo".to_string(),
            inputs: json!({}),
            system_var: SystemVar::default(),
            filename: Some(path.to_string_lossy().into_owned()),
            dev: true,
        });
        host.write_all(encode_line(&message).unwrap().as_bytes())
            .await
            .unwrap();

        assert_eq!(next(&mut lines).await, WorkerMessage::Stream(json!("working")));
        assert_eq!(
            next(&mut lines).await,
            WorkerMessage::Done(ToolOutcome::output(json!({})))
        );
    }
}
