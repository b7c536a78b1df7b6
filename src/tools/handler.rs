//! Tool entry points.
//!
//! A manifest's `entry` names how a leaf tool runs: a Rust handler
//! registered in a [`HandlerTable`], or an external command speaking
//! JSON over stdio ([`CommandHandler`]).

use crate::tools::definition::{ToolDescriptor, ToolEntry};
use crate::tools::error::ToolError;
use crate::tools::sandbox::InvocationContext;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Future returned by a tool handler.
pub type ToolCallFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'static>>;

/// A callable tool implementation.
///
/// Any `Fn(Value, InvocationContext) -> impl Future` closure is a handler:
///
/// ```rust,ignore
/// let mut table = HandlerTable::new();
/// table.register("echo", |input: Value, _ctx: InvocationContext| async move {
///     Ok::<_, ToolError>(input)
/// });
/// ```
pub trait ToolHandler: Send + Sync {
    /// Runs the tool on validated input.
    fn call(&self, input: Value, ctx: InvocationContext) -> ToolCallFuture;
}

impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    fn call(&self, input: Value, ctx: InvocationContext) -> ToolCallFuture {
        Box::pin(self(input, ctx))
    }
}

/// Named Rust handlers available to a worker.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.names())
            .finish()
    }
}

impl HandlerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        self.register(name, handler);
        self
    }

    /// Looks up a handler.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves the entry point of `tool`.
    ///
    /// # Errors
    ///
    /// Fails when the tool has no entry or names an unregistered handler.
    pub fn resolve(&self, tool: &ToolDescriptor) -> Result<Arc<dyn ToolHandler>, ToolError> {
        let tool_id = &tool.meta.tool_id;
        match &tool.entry {
            Some(ToolEntry::Handler { handler }) => self.get(handler).ok_or_else(|| {
                ToolError::execution_failed(tool_id, format!("handler '{handler}' is not registered"))
            }),
            Some(ToolEntry::Command { command, args }) => {
                let base = Path::new(&tool.meta.tool_filename).parent();
                Ok(Arc::new(CommandHandler::new(tool_id, command, args.clone(), base)))
            }
            None => Err(ToolError::execution_failed(tool_id, "module declares no entry point")),
        }
    }
}

/// Runs an external program per invocation.
///
/// The validated input is written to stdin as JSON. Lines on stderr are
/// forwarded as log messages; stdout must hold exactly one JSON value.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    tool_id: String,
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandHandler {
    /// Creates a handler; relative program paths resolve against `base`.
    #[must_use]
    pub fn new(
        tool_id: impl Into<String>,
        command: &str,
        args: Vec<String>,
        base: Option<&Path>,
    ) -> Self {
        let base = base.filter(|b| !b.as_os_str().is_empty());
        let program = match base {
            Some(dir) if command.contains('/') && Path::new(command).is_relative() => {
                dir.join(command)
            }
            _ => PathBuf::from(command),
        };
        Self {
            tool_id: tool_id.into(),
            program,
            args,
            working_dir: base.map(Path::to_path_buf),
        }
    }

    async fn run(self, input: Value, ctx: InvocationContext) -> Result<Value, ToolError> {
        let fail = |reason: String| ToolError::execution_failed(&self.tool_id, reason);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| fail(format!("failed to start '{}': {e}", self.program.display())))?;

        let payload = serde_json::to_vec(&input).map_err(|e| fail(e.to_string()))?;
        let stdin_task = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let written = stdin.write_all(&payload).await;
                drop(stdin);
                written
            })
        });

        let stderr_task = child.stderr.take().map(|stderr| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    ctx.log(vec![Value::String(line)]);
                }
            })
        });

        let mut stdout = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout)
                .await
                .map_err(|e| fail(format!("failed to read output: {e}")))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| fail(format!("failed to wait for process: {e}")))?;
        if let Some(task) = stderr_task {
            let _ = task.await;
        }
        if let Some(task) = stdin_task {
            if let Ok(Err(e)) = task.await {
                tracing::debug!(tool_id = %self.tool_id, error = %e, "Command closed stdin early");
            }
        }

        if !status.success() {
            return Err(fail(format!("process exited with {status}")));
        }
        serde_json::from_slice(&stdout).map_err(|e| fail(format!("invalid JSON output: {e}")))
    }
}

impl ToolHandler for CommandHandler {
    fn call(&self, input: Value, ctx: InvocationContext) -> ToolCallFuture {
        Box::pin(self.clone().run(input, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::definition::ToolMeta;
    use crate::tools::sandbox::{RelayConfig, RelayTable, SystemVar, WorkerMessage};
    use crate::tools::definition::VersionEntry;
    use crate::tools::version::hash_version;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn context() -> (InvocationContext, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = Arc::new(RelayTable::new(RelayConfig::default()));
        (InvocationContext::new(SystemVar::default(), tx, relay), rx)
    }

    fn tool(entry: Option<ToolEntry>, filename: &str) -> ToolDescriptor {
        let versions = vec![VersionEntry::new("1")];
        ToolDescriptor {
            meta: ToolMeta {
                tool_id: "t".to_string(),
                name: "T".to_string(),
                description: String::new(),
                tool_description: None,
                tags: Vec::new(),
                icon: String::new(),
                author: None,
                course_url: None,
                secret_input_config: None,
                tool_filename: filename.to_string(),
                version: hash_version(&versions).unwrap(),
            },
            version_list: versions,
            parent_id: None,
            entry,
        }
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let table = HandlerTable::new().with(
            "double",
            |input: Value, _ctx: InvocationContext| async move {
                let n = input["n"].as_i64().unwrap_or(0);
                Ok::<_, ToolError>(json!({"n": n * 2}))
            },
        );
        let handler = table
            .resolve(&tool(
                Some(ToolEntry::Handler {
                    handler: "double".to_string(),
                }),
                "t.json",
            ))
            .unwrap();
        let (ctx, _rx) = context();
        assert_eq!(handler.call(json!({"n": 21}), ctx).await.unwrap(), json!({"n": 42}));
    }

    #[test]
    fn unregistered_handler_and_missing_entry_fail() {
        let table = HandlerTable::new();
        let missing = tool(
            Some(ToolEntry::Handler {
                handler: "nope".to_string(),
            }),
            "t.json",
        );
        let err = table.resolve(&missing).err().unwrap();
        assert!(err.to_string().contains("'nope' is not registered"));
        assert!(table.resolve(&tool(None, "t.json")).is_err());
    }

    #[test]
    fn relative_commands_resolve_next_to_manifest() {
        let handler = CommandHandler::new("t", "./run.sh", Vec::new(), Some(Path::new("/plugins/t")));
        assert_eq!(handler.program, PathBuf::from("/plugins/t/./run.sh"));
        let on_path = CommandHandler::new("t", "python3", Vec::new(), Some(Path::new("/plugins/t")));
        assert_eq!(on_path.program, PathBuf::from("python3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_reads_stdin_and_writes_stdout() {
        let handler = CommandHandler::new("cat", "cat", Vec::new(), None);
        let (ctx, _rx) = context();
        let output = handler.call(json!({"echo": [1, 2]}), ctx).await.unwrap();
        assert_eq!(output, json!({"echo": [1, 2]}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_stderr_becomes_log_and_failure_is_reported() {
        let handler = CommandHandler::new(
            "sh",
            "sh",
            vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()],
            None,
        );
        let (ctx, mut rx) = context();
        let err = handler.call(json!({}), ctx).await.unwrap_err();
        assert!(err.to_string().contains("exited"));
        assert_eq!(
            rx.recv().await,
            Some(WorkerMessage::Log {
                args: vec![json!("oops")]
            })
        );
    }
}
