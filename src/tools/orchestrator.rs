//! Host-side invocation driver.
//!
//! `Orchestrator::submit` takes a sandbox from the pool, starts one run
//! and pumps the sandbox's messages until `done`: stream chunks go to the
//! caller, logs go to `tracing`, and upload requests are performed
//! against the object store and answered. The caller always gets an
//! outcome. A run that exceeds its deadline or loses its sandbox ends
//! with a synthesized error and the sandbox is torn down.

use crate::storage::{ObjectMetadata, ObjectStore};
use crate::tools::error::ToolError;
use crate::tools::sandbox::config::DEFAULT_INVOCATION_TIMEOUT;
use crate::tools::sandbox::{
    HostMessage, RunTool, Sandbox, SandboxPool, SystemVar, ToolOutcome, UploadFile,
    UploadFileResponse, UploadResult, WorkerMessage,
};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

/// Default object prefix for files produced by tools.
pub const DEFAULT_UPLOAD_PREFIX: &str = "tool-files";

/// Outcome error for a run that hit its deadline.
pub const TIMEOUT_ERROR: &str = "timeout";

/// Outcome error for a sandbox that broke before `done`.
pub const SANDBOX_FAULT_ERROR: &str = "sandbox fault";

/// One tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub tool_id: String,
    pub inputs: Value,
    pub system_var: SystemVar,
    /// Module file to run from instead of the registry
    pub filename: Option<String>,
    pub dev: bool,
}

impl InvocationRequest {
    /// Creates a request with empty system variables.
    #[must_use]
    pub fn new(tool_id: impl Into<String>, inputs: Value) -> Self {
        Self {
            tool_id: tool_id.into(),
            inputs,
            system_var: SystemVar::default(),
            filename: None,
            dev: false,
        }
    }

    /// Sets the system variables passed to the tool.
    #[must_use]
    pub fn with_system_var(mut self, system_var: SystemVar) -> Self {
        self.system_var = system_var;
        self
    }

    /// Runs the tool from a module file, marking the run as development.
    #[must_use]
    pub fn with_dev_file(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self.dev = true;
        self
    }

    fn into_run(self) -> RunTool {
        RunTool {
            tool_id: self.tool_id,
            inputs: self.inputs,
            system_var: self.system_var,
            filename: self.filename,
            dev: self.dev,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Wall-clock limit per invocation, including sandbox acquisition.
    ///
    /// Default: 60 seconds
    pub invocation_timeout: Duration,

    /// Object prefix for uploaded files; the tool ID is appended.
    ///
    /// Default: `tool-files`
    pub upload_prefix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            upload_prefix: DEFAULT_UPLOAD_PREFIX.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the invocation timeout.
    #[must_use]
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Sets the upload prefix.
    #[must_use]
    pub fn with_upload_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.upload_prefix = prefix.into();
        self
    }
}

/// Invocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationMetrics {
    pub submitted: u64,
    /// Runs that ended with an output
    pub succeeded: u64,
    /// Runs that ended with a tool-reported error
    pub failed: u64,
    pub timed_out: u64,
    /// Runs whose sandbox broke before `done`
    pub faulted: u64,
    pub uploads_relayed: u64,
    pub upload_failures: u64,
}

/// Drives tool invocations through pooled sandboxes.
#[derive(Debug)]
pub struct Orchestrator {
    pool: Arc<SandboxPool>,
    objects: Arc<dyn ObjectStore>,
    config: OrchestratorConfig,
    metrics: Mutex<InvocationMetrics>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(pool: Arc<SandboxPool>, objects: Arc<dyn ObjectStore>, config: OrchestratorConfig) -> Self {
        Self {
            pool,
            objects,
            config,
            metrics: Mutex::new(InvocationMetrics::default()),
        }
    }

    /// The sandbox pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<SandboxPool> {
        &self.pool
    }

    /// Current counters.
    #[must_use]
    pub fn metrics(&self) -> InvocationMetrics {
        *self.lock_metrics()
    }

    /// Runs one tool and returns its outcome.
    ///
    /// `on_stream` receives each streamed chunk in emission order. This
    /// never fails: every problem is reported as an error outcome.
    pub async fn submit<F>(&self, request: InvocationRequest, mut on_stream: F) -> ToolOutcome
    where
        F: FnMut(Value) + Send,
    {
        self.lock_metrics().submitted += 1;
        let tool_id = request.tool_id.clone();
        let deadline = Instant::now() + self.config.invocation_timeout;

        let mut sandbox = match timeout_at(deadline, self.pool.acquire()).await {
            Ok(Ok(sandbox)) => sandbox,
            Ok(Err(e)) => {
                tracing::error!(tool_id = %tool_id, error = %e, "No sandbox available");
                self.lock_metrics().faulted += 1;
                return ToolOutcome::error(SANDBOX_FAULT_ERROR);
            }
            Err(_) => {
                tracing::warn!(tool_id = %tool_id, "Timed out waiting for a sandbox");
                self.lock_metrics().timed_out += 1;
                return ToolOutcome::error(TIMEOUT_ERROR);
            }
        };

        let run = request.into_run();
        match timeout_at(deadline, self.drive(&mut sandbox, run, &mut on_stream)).await {
            Ok(Ok(outcome)) => {
                {
                    let mut metrics = self.lock_metrics();
                    if outcome.is_error() {
                        metrics.failed += 1;
                    } else {
                        metrics.succeeded += 1;
                    }
                }
                self.pool.release(sandbox).await;
                outcome
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    tool_id = %tool_id,
                    sandbox_id = %sandbox.id(),
                    error = %e,
                    "Sandbox failed before completing the run"
                );
                self.lock_metrics().faulted += 1;
                self.pool.discard(sandbox).await;
                ToolOutcome::error(SANDBOX_FAULT_ERROR)
            }
            Err(_) => {
                let error = ToolError::timeout(&tool_id, self.config.invocation_timeout);
                tracing::warn!(sandbox_id = %sandbox.id(), error = %error, "Terminating sandbox");
                self.lock_metrics().timed_out += 1;
                self.pool.discard(sandbox).await;
                ToolOutcome::error(TIMEOUT_ERROR)
            }
        }
    }

    async fn drive<F>(
        &self,
        sandbox: &mut Sandbox,
        run: RunTool,
        on_stream: &mut F,
    ) -> Result<ToolOutcome, ToolError>
    where
        F: FnMut(Value) + Send,
    {
        let tool_id = run.tool_id.clone();
        let prefix = upload_prefix(&self.config.upload_prefix, &tool_id);
        sandbox.start(run).await?;

        // Pending uploads are aborted when the run ends.
        let mut relays: JoinSet<UploadFileResponse> = JoinSet::new();
        loop {
            tokio::select! {
                message = sandbox.recv() => match message? {
                    WorkerMessage::Stream(chunk) => on_stream(chunk),
                    WorkerMessage::Log { args } => {
                        let args = Value::Array(args);
                        tracing::info!(
                            target: "toolbox_runtime::tool",
                            tool_id = %tool_id,
                            args = %args,
                            "Tool log"
                        );
                    }
                    WorkerMessage::UploadFile(request) => {
                        relays.spawn(relay_upload(self.objects.clone(), prefix.clone(), request));
                    }
                    WorkerMessage::Done(outcome) => return Ok(outcome),
                },
                Some(joined) = relays.join_next(), if !relays.is_empty() => match joined {
                    Ok(response) => {
                        {
                            let mut metrics = self.lock_metrics();
                            if response.error.is_some() {
                                metrics.upload_failures += 1;
                            } else {
                                metrics.uploads_relayed += 1;
                            }
                        }
                        sandbox.send(&HostMessage::UploadFileResponse(response)).await?;
                    }
                    Err(e) => {
                        self.lock_metrics().upload_failures += 1;
                        tracing::error!(tool_id = %tool_id, error = %e, "Upload relay task failed");
                    }
                },
            }
        }
    }

    fn lock_metrics(&self) -> MutexGuard<'_, InvocationMetrics> {
        self.metrics.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn upload_prefix(base: &str, tool_id: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        tool_id.to_string()
    } else {
        format!("{base}/{tool_id}")
    }
}

/// Performs one upload and builds the reply for the worker.
async fn relay_upload(
    objects: Arc<dyn ObjectStore>,
    prefix: String,
    request: UploadFile,
) -> UploadFileResponse {
    let UploadFile { id, file } = request;
    let Some(basename) = Path::new(&file.filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
    else {
        return UploadFileResponse::failure(id, format!("invalid filename '{}'", file.filename));
    };
    let bytes = match file.decode() {
        Ok(bytes) => bytes,
        Err(e) => return UploadFileResponse::failure(id, e.to_string()),
    };

    let size = bytes.len();
    match objects
        .upload(bytes, ObjectMetadata::new(prefix, basename, file.content_type))
        .await
    {
        Ok(stored) => {
            tracing::debug!(request_id = %id, object = %stored.object_name, size, "Upload relayed");
            UploadFileResponse::success(
                id,
                UploadResult {
                    access_url: stored.access_url,
                    object_name: stored.object_name,
                },
            )
        }
        Err(e) => {
            tracing::warn!(request_id = %id, error = %e, "Upload failed");
            UploadFileResponse::failure(id, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use crate::tools::handler::HandlerTable;
    use crate::tools::loader::ModuleLoader;
    use crate::tools::registry::{RegistryConfig, ToolRegistry};
    use crate::tools::sandbox::traits::tests::scripted;
    use crate::tools::sandbox::{
        FileUpload, InProcessSandboxFactory, InvocationContext, PoolConfig, RelayConfig,
        SandboxFactory, SandboxFactoryFuture, WorkerRuntime,
    };
    use serde_json::json;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
        "toolId": "files",
        "name": "Files",
        "children": [
            {"toolId": "files/report", "name": "Report", "entry": {"handler": "report"},
             "versionList": [{"value": "1"}]},
            {"toolId": "files/stall", "name": "Stall", "entry": {"handler": "stall"},
             "versionList": [{"value": "1"}]}
        ]
    }"#;

    struct Harness {
        _dir: TempDir,
        objects: Arc<MemoryObjectStore>,
        orchestrator: Orchestrator,
    }

    async fn harness(timeout: Duration) -> Harness {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("files.json"), MANIFEST).unwrap();
        let registry = Arc::new(ToolRegistry::new(
            RegistryConfig::new(dir.path(), dir.path().join("uploaded")),
            Arc::new(ModuleLoader::default()),
        ));
        registry.refresh_builtins().await;

        let handlers = HandlerTable::new()
            .with("report", |_input: Value, ctx: InvocationContext| async move {
                ctx.stream_response(json!(1));
                ctx.log(vec![json!("writing report")]);
                ctx.stream_response(json!(2));
                let stored = ctx
                    .upload_file(FileUpload::new("../out/report.csv", "text/csv", "a,b"))
                    .await?;
                Ok::<_, ToolError>(json!({"url": stored.access_url, "name": stored.object_name}))
            })
            .with("stall", |_input: Value, _ctx: InvocationContext| async move {
                std::future::pending::<()>().await;
                Ok::<_, ToolError>(Value::Null)
            });
        let worker = WorkerRuntime::new(registry, Arc::new(handlers), RelayConfig::default());
        let pool = SandboxPool::new(
            Arc::new(InProcessSandboxFactory::new(worker)),
            PoolConfig::new().with_warm_count(0),
        )
        .unwrap();

        let objects = Arc::new(MemoryObjectStore::new("https://cdn.example"));
        let orchestrator = Orchestrator::new(
            Arc::new(pool),
            objects.clone(),
            OrchestratorConfig::default()
                .with_invocation_timeout(timeout)
                .with_upload_prefix("outputs/"),
        );
        Harness {
            _dir: dir,
            objects,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn streams_and_uploads_reach_the_caller() {
        let h = harness(Duration::from_secs(10)).await;
        let mut chunks = Vec::new();
        let outcome = h
            .orchestrator
            .submit(InvocationRequest::new("files/report", json!({})), |chunk| {
                chunks.push(chunk);
            })
            .await;

        assert_eq!(chunks, vec![json!(1), json!(2)]);
        assert_eq!(
            outcome,
            ToolOutcome::output(json!({
                "url": "https://cdn.example/outputs/files/report/report.csv",
                "name": "outputs/files/report/report.csv"
            }))
        );
        assert_eq!(
            h.objects.get("outputs/files/report/report.csv"),
            Some(b"a,b".to_vec())
        );

        let metrics = h.orchestrator.metrics();
        assert_eq!(metrics.succeeded, 1);
        assert_eq!(metrics.uploads_relayed, 1);
        assert_eq!(h.orchestrator.pool().metrics().available, 1);
    }

    #[tokio::test]
    async fn tool_errors_keep_the_sandbox() {
        let h = harness(Duration::from_secs(10)).await;
        let outcome = h
            .orchestrator
            .submit(InvocationRequest::new("nope", json!({})), |_| {})
            .await;
        assert_eq!(outcome, ToolOutcome::error("Tool with ID nope not found"));
        assert_eq!(h.orchestrator.metrics().failed, 1);
        assert_eq!(h.orchestrator.pool().metrics().available, 1);
    }

    #[tokio::test]
    async fn deadline_terminates_the_sandbox() {
        let h = harness(Duration::from_millis(100)).await;
        let started = std::time::Instant::now();
        let outcome = h
            .orchestrator
            .submit(InvocationRequest::new("files/stall", json!({})), |_| {})
            .await;

        assert_eq!(outcome, ToolOutcome::error(TIMEOUT_ERROR));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(h.orchestrator.metrics().timed_out, 1);
        let pool = h.orchestrator.pool().metrics();
        assert_eq!(pool.available, 0);
        assert_eq!(pool.destroyed, 1);
    }

    /// Hands out sandboxes whose worker is already gone.
    #[derive(Debug)]
    struct DeadFactory;

    impl SandboxFactory for DeadFactory {
        fn create(&self) -> SandboxFactoryFuture {
            let (sandbox, worker, _handle) = scripted();
            drop(worker);
            Box::pin(async move { Ok(sandbox) })
        }

        fn name(&self) -> &'static str {
            "dead"
        }
    }

    #[tokio::test]
    async fn lost_sandbox_is_a_fault() {
        let pool = SandboxPool::new(Arc::new(DeadFactory), PoolConfig::new().with_warm_count(0)).unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(pool),
            Arc::new(MemoryObjectStore::default()),
            OrchestratorConfig::default(),
        );
        let outcome = orchestrator
            .submit(InvocationRequest::new("any", json!({})), |_| {})
            .await;

        assert_eq!(outcome, ToolOutcome::error(SANDBOX_FAULT_ERROR));
        assert_eq!(orchestrator.metrics().faulted, 1);
        assert_eq!(orchestrator.pool().metrics().destroyed, 1);
    }

    #[test]
    fn upload_prefix_appends_tool_id() {
        assert_eq!(upload_prefix("outputs/", "a/b"), "outputs/a/b");
        assert_eq!(upload_prefix("", "a"), "a");
    }
}
