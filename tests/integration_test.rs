//! Integration tests for the toolbox runtime.
//!
//! These tests drive the public API end to end:
//! - Orchestrator over in-process sandboxes
//! - Upload relay through the host's object store
//! - Registry refresh coordination and the refresher actor

use acton_reactive::prelude::{ActonApp, ActorHandleInterface};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use toolbox_runtime::prelude::*;
use toolbox_runtime::storage::{RecordStore, ToolRecord};
use toolbox_runtime::tools::sandbox::{FileUpload, PoolConfig, RelayConfig};
use toolbox_runtime::tools::{
    parse_module, OrchestratorConfig, RawModule, RefreshBuiltins, RegistryConfig,
    RegistryRefresher,
};

const LAB: &str = r#"{
    "toolId": "lab",
    "name": "Lab",
    "tags": ["testing"],
    "author": "qa",
    "children": [
        {"toolId": "lab/pair", "name": "Pair", "entry": {"handler": "pair"},
         "versionList": [{"value": "1"}]},
        {"toolId": "lab/count", "name": "Count", "entry": {"handler": "bad_count"},
         "versionList": [{"value": "1",
            "outputs": [{"key": "count", "valueType": "number", "required": true}]}]},
        {"toolId": "lab/sleep", "name": "Sleep", "entry": {"handler": "sleep"},
         "versionList": [{"value": "1"}]}
    ]
}"#;

fn lab_handlers() -> HandlerTable {
    builtin_handlers()
        .with("pair", |_input: Value, ctx: InvocationContext| async move {
            let (a, b) = tokio::join!(
                ctx.upload_file(FileUpload::new("a.txt", "text/plain", "first")),
                ctx.upload_file(FileUpload::new("nested/b.txt", "text/plain", "second")),
            );
            Ok::<_, ToolError>(json!({"a": a?.object_name, "b": b?.object_name}))
        })
        .with("bad_count", |_input: Value, _ctx: InvocationContext| async move {
            Ok::<_, ToolError>(json!({"count": "three"}))
        })
        .with("sleep", |_input: Value, _ctx: InvocationContext| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, ToolError>(Value::Null)
        })
}

struct Runtime {
    _dir: TempDir,
    objects: Arc<MemoryObjectStore>,
    orchestrator: Orchestrator,
}

async fn runtime(timeout: Duration) -> Runtime {
    let dir = TempDir::new().unwrap();
    let builtin_dir = dir.path().join("builtin");
    std::fs::create_dir_all(&builtin_dir).unwrap();
    std::fs::copy(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("plugins/builtin/core.json"),
        builtin_dir.join("core.json"),
    )
    .unwrap();
    std::fs::write(builtin_dir.join("lab.json"), LAB).unwrap();

    let registry = Arc::new(ToolRegistry::new(
        RegistryConfig::new(&builtin_dir, dir.path().join("uploaded")),
        Arc::new(ModuleLoader::default()),
    ));
    registry.refresh_builtins().await;

    let worker = WorkerRuntime::new(registry, Arc::new(lab_handlers()), RelayConfig::default());
    let pool = SandboxPool::new(
        Arc::new(InProcessSandboxFactory::new(worker)),
        PoolConfig::new().with_warm_count(1),
    )
    .unwrap();
    pool.warm().await.unwrap();

    let objects = Arc::new(MemoryObjectStore::new("https://files.test"));
    let orchestrator = Orchestrator::new(
        Arc::new(pool),
        objects.clone(),
        OrchestratorConfig::default().with_invocation_timeout(timeout),
    );
    Runtime {
        _dir: dir,
        objects,
        orchestrator,
    }
}

/// A builtin tool stores a file through the host and returns its URL.
#[tokio::test]
async fn test_save_text_round_trips_through_the_host() {
    let rt = runtime(Duration::from_secs(10)).await;

    let request = InvocationRequest::new(
        "core/saveText",
        json!({"filename": "notes/hello.txt", "content": "hello"}),
    );
    let outcome = rt.orchestrator.submit(request, |_| {}).await;

    assert_eq!(
        outcome,
        ToolOutcome::output(json!({
            "accessUrl": "https://files.test/tool-files/core/saveText/hello.txt",
            "objectName": "tool-files/core/saveText/hello.txt"
        }))
    );
    assert_eq!(
        rt.objects.get("tool-files/core/saveText/hello.txt"),
        Some(b"hello".to_vec())
    );
}

/// Echo streams nothing and returns its validated input.
#[tokio::test]
async fn test_echo_returns_input() {
    let rt = runtime(Duration::from_secs(10)).await;
    let mut chunks = Vec::new();
    let outcome = rt
        .orchestrator
        .submit(
            InvocationRequest::new("core/echo", json!({"text": "hi", "extra": 1})),
            |chunk| chunks.push(chunk),
        )
        .await;

    assert!(chunks.is_empty());
    assert_eq!(outcome, ToolOutcome::output(json!({"text": "hi"})));
}

#[tokio::test]
async fn test_unknown_tool_reports_not_found() {
    let rt = runtime(Duration::from_secs(10)).await;
    let outcome = rt
        .orchestrator
        .submit(InvocationRequest::new("lab/missing", json!({})), |_| {})
        .await;
    assert_eq!(outcome, ToolOutcome::error("Tool with ID lab/missing not found"));
}

#[tokio::test]
async fn test_toolset_parent_is_not_callable() {
    let rt = runtime(Duration::from_secs(10)).await;
    let outcome = rt
        .orchestrator
        .submit(InvocationRequest::new("lab", json!({})), |_| {})
        .await;
    assert!(outcome.is_error());
}

#[tokio::test]
async fn test_bad_output_reports_field_path() {
    let rt = runtime(Duration::from_secs(10)).await;
    let outcome = rt
        .orchestrator
        .submit(InvocationRequest::new("lab/count", json!({})), |_| {})
        .await;

    let message = outcome.error_message().unwrap();
    assert!(message.starts_with("count: "), "unexpected error: {message}");
    assert!(message.contains("string"), "unexpected error: {message}");
}

#[tokio::test]
async fn test_missing_required_input_reports_field_path() {
    let rt = runtime(Duration::from_secs(10)).await;
    let outcome = rt
        .orchestrator
        .submit(InvocationRequest::new("core/echo", json!({})), |_| {})
        .await;
    assert_eq!(outcome, ToolOutcome::error("text: Required"));
}

/// Two uploads in flight at once each get their own response.
#[tokio::test]
async fn test_concurrent_uploads_resolve_independently() {
    let rt = runtime(Duration::from_secs(10)).await;
    let outcome = rt
        .orchestrator
        .submit(InvocationRequest::new("lab/pair", json!({})), |_| {})
        .await;

    assert_eq!(
        outcome,
        ToolOutcome::output(json!({
            "a": "tool-files/lab/pair/a.txt",
            "b": "tool-files/lab/pair/b.txt"
        }))
    );
    assert_eq!(rt.objects.get("tool-files/lab/pair/a.txt"), Some(b"first".to_vec()));
    assert_eq!(rt.objects.get("tool-files/lab/pair/b.txt"), Some(b"second".to_vec()));
    assert_eq!(rt.orchestrator.metrics().uploads_relayed, 2);
}

/// A run past its deadline ends with a timeout and the sandbox is replaced.
#[tokio::test]
async fn test_deadline_ends_run_and_pool_recovers() {
    let rt = runtime(Duration::from_millis(200)).await;

    let outcome = rt
        .orchestrator
        .submit(InvocationRequest::new("lab/sleep", json!({})), |_| {})
        .await;
    assert_eq!(outcome, ToolOutcome::error("timeout"));

    let outcome = rt
        .orchestrator
        .submit(InvocationRequest::new("core/echo", json!({"text": "again"})), |_| {})
        .await;
    assert_eq!(outcome, ToolOutcome::output(json!({"text": "again"})));

    let pool = rt.orchestrator.pool().metrics();
    assert_eq!(pool.destroyed, 1);
    assert_eq!(pool.total_created, 2);
}

#[test]
fn test_toolset_module_yields_parent_and_children() {
    let raw: RawModule = serde_json::from_str(LAB).unwrap();
    let descriptors = parse_module(&raw, "lab.json", &Default::default()).unwrap();

    assert_eq!(descriptors.len(), 4);
    assert!(descriptors[0].is_toolset());
    for child in &descriptors[1..] {
        assert_eq!(child.parent_id(), Some("lab"));
        assert_eq!(child.meta().tags, vec!["testing".to_string()]);
        assert_eq!(child.meta().author.as_deref(), Some("qa"));
        assert_eq!(child.meta().icon, descriptors[0].meta().icon);
    }
}

/// Two hosts sharing a lock never reconcile at the same time.
#[tokio::test]
async fn test_concurrent_refreshes_share_the_lock() {
    let objects = Arc::new(MemoryObjectStore::default());
    let records = Arc::new(MemoryRecordStore::new());
    let lock = Arc::new(MemoryLock::new());
    records
        .upsert(ToolRecord::tool("remote", "plugins/remote.json"))
        .await
        .unwrap();
    objects.insert(
        "plugins/remote.json",
        br#"{"toolId": "remote", "name": "Remote", "versionList": [{"value": "1"}]}"#.to_vec(),
    );

    let dir = TempDir::new().unwrap();
    let host = |name: &str| {
        ToolRegistry::new(
            RegistryConfig::new(dir.path().join("builtin"), dir.path().join(name)),
            Arc::new(ModuleLoader::default()),
        )
        .with_backends(RegistryBackends {
            objects: objects.clone(),
            records: records.clone(),
            lock: lock.clone(),
        })
    };
    let first = host("first");
    let second = host("second");

    let (a, b) = tokio::join!(first.refresh_uploaded(), second.refresh_uploaded());
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_skipped()).count(), 1);
    assert!(outcomes.contains(&RefreshOutcome::Refreshed {
        removed: 0,
        fetched: 1,
        total: 1
    }));
}

/// The refresher actor rescans builtins on request.
#[tokio::test(flavor = "multi_thread")]
async fn test_refresher_actor_rescans_builtins() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ToolRegistry::new(
        RegistryConfig::new(dir.path(), dir.path().join("uploaded")),
        Arc::new(ModuleLoader::default()),
    ));
    std::fs::write(dir.path().join("lab.json"), LAB).unwrap();

    let mut app = ActonApp::launch_async().await;
    let refresher = RegistryRefresher::spawn(&mut app, registry.clone()).await;
    refresher.send(RefreshBuiltins).await;

    let mut found = false;
    for _ in 0..50 {
        if registry.get_tool("lab/pair").is_some() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(found, "refresher never loaded builtins");

    app.shutdown_all().await.expect("Shutdown failed");
}
