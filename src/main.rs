//! `toolbox-runtime` command line.
//!
//! The same binary is both the host and the process sandbox worker: the
//! host spawns `toolbox-runtime worker` children and talks to them over
//! stdin/stdout.

use acton_reactive::prelude::*;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use toolbox_runtime::config::{self, RuntimeConfig};
use toolbox_runtime::error::RuntimeError;
use toolbox_runtime::logging::{init_logging, LoggingConfig};
use toolbox_runtime::storage::FsObjectStore;
use toolbox_runtime::tools::builtins::builtin_handlers;
use toolbox_runtime::tools::sandbox::protocol::{SystemVar, ToolInfo, UserInfo};
use toolbox_runtime::tools::sandbox::{
    apply_memory_limit_from_env, InProcessSandboxFactory, ProcessSandboxFactory,
    SandboxFactory, SandboxMode, SandboxPool, WorkerRuntime,
};
use toolbox_runtime::tools::{
    InvocationRequest, ModuleLoader, Orchestrator, RefreshOutcome, RefreshUploaded,
    RegistryRefresher, ToolRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "toolbox-runtime", version, about = "Run sandboxed tool plugins")]
struct Cli {
    /// Configuration file (defaults to the standard search paths)
    #[arg(long, short, global = true, env = "TOOLBOX_RUNTIME_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the sandbox protocol on stdin/stdout
    Worker,

    /// Run one tool and print its outcome
    Run {
        /// Tool to invoke, e.g. `core/echo`
        tool_id: String,

        /// Inputs as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,

        /// Run from this module file instead of the registry
        #[arg(long)]
        file: Option<PathBuf>,

        /// User id the tool runs on behalf of
        #[arg(long, default_value = "local")]
        user: String,
    },

    /// List registered tools
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Reconcile the uploaded tool collection once
    Refresh,

    /// Refresh uploaded tools on an interval until interrupted
    Watch {
        /// Seconds between refreshes (overrides the config file)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), RuntimeError> {
    let config = match &cli.config {
        Some(path) => config::from_path(path)?,
        None => config::load()?,
    };

    match cli.command {
        Commands::Worker => worker(config).await,
        Commands::Run {
            tool_id,
            input,
            file,
            user,
        } => run_tool(config, cli.config, tool_id, &input, file, user).await,
        Commands::List { json } => list(config, json).await,
        Commands::Refresh => refresh(config).await,
        Commands::Watch { interval } => watch(config, interval).await,
    }
}

/// Stdout carries the protocol, so worker logs only go to stderr.
async fn worker(config: RuntimeConfig) -> Result<(), RuntimeError> {
    let logging = LoggingConfig::new()
        .with_level(config.logging.level)
        .with_console(true)
        .with_file(false);
    init_logging(&logging)?;

    if let Some(limit) = apply_memory_limit_from_env()? {
        tracing::debug!(limit, "Worker memory limit applied");
    }

    let registry = build_registry(&config, true).await?;
    // Warm workers outlive host refreshes; follow the upload dir.
    let reload = registry.spawn_uploaded_reload(Duration::from_secs(
        config.registry.refresh_interval_secs.max(1),
    ));
    let worker = WorkerRuntime::new(registry, Arc::new(builtin_handlers()), config.relay_config());
    let served = worker
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await;
    reload.abort();
    served.map_err(RuntimeError::from)
}

async fn run_tool(
    config: RuntimeConfig,
    config_path: Option<PathBuf>,
    tool_id: String,
    input: &str,
    file: Option<PathBuf>,
    user: String,
) -> Result<(), RuntimeError> {
    init_logging(&config.logging)?;

    let inputs: Value = serde_json::from_str(input)
        .map_err(|e| RuntimeError::configuration("--input", format!("invalid JSON: {e}")))?;

    let registry = build_registry(&config, false).await?;
    let version = registry
        .get_tool(&tool_id)
        .map(|d| d.meta().version.to_string())
        .unwrap_or_default();

    let factory: Arc<dyn SandboxFactory> = match config.sandbox.mode {
        SandboxMode::Process => {
            let mut sandbox = config.sandbox_config();
            // Re-executed workers must read the same file as the host.
            if let (None, Some(path)) = (&sandbox.worker_program, &config_path) {
                sandbox.worker_args.push("--config".to_string());
                sandbox.worker_args.push(path.display().to_string());
            }
            Arc::new(ProcessSandboxFactory::from_config(&sandbox)?)
        }
        SandboxMode::InProcess => Arc::new(InProcessSandboxFactory::new(WorkerRuntime::new(
            Arc::clone(&registry),
            Arc::new(builtin_handlers()),
            config.relay_config(),
        ))),
    };
    // A single run never reuses a sandbox, so skip warming the pool.
    let pool = Arc::new(SandboxPool::new(factory, config.pool_config().with_warm_count(0))?);
    let objects = Arc::new(FsObjectStore::new(
        &config.storage.root,
        &config.storage.base_url,
    ));
    let orchestrator = Orchestrator::new(Arc::clone(&pool), objects, config.orchestrator_config());

    let system_var = SystemVar {
        user: UserInfo {
            id: user.clone(),
            username: user,
            ..UserInfo::default()
        },
        tool: ToolInfo {
            id: tool_id.clone(),
            version,
        },
        time: chrono::Utc::now().to_rfc3339(),
        ..SystemVar::default()
    };
    let mut request = InvocationRequest::new(tool_id, inputs).with_system_var(system_var);
    if let Some(file) = file {
        request = request.with_dev_file(file.to_string_lossy());
    }

    let outcome = orchestrator
        .submit(request, |chunk| println!("{}", json!({ "stream": chunk })))
        .await;
    pool.shutdown().await;

    let rendered = serde_json::to_string_pretty(&outcome)
        .map_err(|e| RuntimeError::launch_failed(format!("cannot render outcome: {e}")))?;
    println!("{rendered}");
    if outcome.is_error() {
        return Err(RuntimeError::launch_failed("tool run failed"));
    }
    Ok(())
}

async fn list(config: RuntimeConfig, as_json: bool) -> Result<(), RuntimeError> {
    init_logging(&config.logging)?;
    let registry = build_registry(&config, false).await?;
    let tools = registry.list_tools();

    if as_json {
        let rendered = serde_json::to_string_pretty(&tools)
            .map_err(|e| RuntimeError::launch_failed(format!("cannot render tools: {e}")))?;
        println!("{rendered}");
        return Ok(());
    }

    for tool in tools {
        let mut flags = Vec::new();
        if tool.is_toolset {
            flags.push("toolset");
        }
        if tool.is_dev {
            flags.push("dev");
        }
        println!(
            "{:<32} {:<10} {:<24} {}",
            tool.tool_id,
            tool.version,
            tool.name,
            flags.join(",")
        );
    }
    Ok(())
}

async fn refresh(config: RuntimeConfig) -> Result<(), RuntimeError> {
    init_logging(&config.logging)?;
    let registry = build_registry(&config, false).await?;
    match registry.refresh_uploaded().await? {
        RefreshOutcome::Refreshed {
            removed,
            fetched,
            total,
        } => println!("refreshed: {total} tools ({fetched} fetched, {removed} removed)"),
        RefreshOutcome::Skipped => println!("skipped: another refresh is in progress"),
    }
    Ok(())
}

async fn watch(config: RuntimeConfig, interval: Option<u64>) -> Result<(), RuntimeError> {
    init_logging(&config.logging)?;
    let secs = interval.unwrap_or(config.registry.refresh_interval_secs);
    if secs == 0 {
        return Err(RuntimeError::configuration(
            "registry.refresh_interval_secs",
            "must be greater than zero",
        ));
    }

    let registry = build_registry(&config, false).await?;
    let mut runtime = ActonApp::launch_async().await;
    let refresher = RegistryRefresher::spawn(&mut runtime, registry).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
    tracing::info!(interval_secs = secs, "Watching uploaded tools");
    loop {
        tokio::select! {
            _ = ticker.tick() => refresher.send(RefreshUploaded).await,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down");
    runtime
        .shutdown_all()
        .await
        .map_err(|e| RuntimeError::launch_failed(e.to_string()))
}

/// Loads every collection the config names.
///
/// The binary runs without record-store and lock backends: the uploaded
/// collection is whatever is already on disk under `upload_dir`.
async fn build_registry(
    config: &RuntimeConfig,
    hot_reload: bool,
) -> Result<Arc<ToolRegistry>, RuntimeError> {
    let loader = Arc::new(ModuleLoader::new(config.icon_resolver()));
    let registry = Arc::new(ToolRegistry::new(config.registry_config(), loader));

    registry.refresh_builtins().await;
    let uploaded = registry.reload_uploaded().await;
    tracing::debug!(uploaded, "Uploaded tools loaded from disk");

    if !config.registry.dev_paths.is_empty() {
        registry
            .register_dev_tools(&config.registry.dev_paths, hot_reload)
            .await?;
    }
    Ok(registry)
}
