//! # Toolbox Runtime: Sandboxed Tool Plugins
//!
//! A plugin execution runtime. Tools are JSON modules on disk; the runtime
//! merges builtin, uploaded and development collections into one registry
//! and runs every invocation inside an isolated worker sandbox.
//!
//! ## Architecture
//!
//! - **Loader**: parses modules into descriptors with content-hash versions
//! - **Registry**: merged view over three collections, refreshed by an actor
//! - **Sandbox pool**: warm worker processes (or tasks) recycled per run
//! - **Capability relay**: workers ask the host to store files on their behalf
//! - **Orchestrator**: validates, runs and streams one invocation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use toolbox_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RuntimeError> {
//!     let config = RuntimeConfig::default();
//!     let loader = Arc::new(ModuleLoader::new(config.icon_resolver()));
//!     let registry = Arc::new(ToolRegistry::new(config.registry_config(), loader));
//!     registry.refresh_builtins().await;
//!
//!     let worker = WorkerRuntime::new(
//!         Arc::clone(&registry),
//!         Arc::new(builtin_handlers()),
//!         config.relay_config(),
//!     );
//!     let pool = Arc::new(SandboxPool::new(
//!         Arc::new(InProcessSandboxFactory::new(worker)),
//!         config.pool_config(),
//!     )?);
//!     let objects = Arc::new(MemoryObjectStore::default());
//!     let orchestrator = Orchestrator::new(pool, objects, config.orchestrator_config());
//!
//!     let outcome = orchestrator
//!         .submit(InvocationRequest::new("core/echo", json!({"text": "hi"})), |_| {})
//!         .await;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
pub mod tools;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::error::{RuntimeError, RuntimeErrorKind};
    pub use crate::logging::{init_logging, LogLevel, LoggingConfig};
    pub use crate::storage::{
        FsObjectStore, MemoryLock, MemoryObjectStore, MemoryRecordStore, ObjectStore,
    };
    pub use crate::tools::builtins::builtin_handlers;
    pub use crate::tools::sandbox::{
        InProcessSandboxFactory, InvocationContext, ProcessSandboxFactory, SandboxPool,
        SystemVar, ToolOutcome, WorkerRuntime,
    };
    pub use crate::tools::{
        Descriptor, HandlerTable, InvocationRequest, ModuleLoader, Orchestrator, RefreshOutcome,
        RegistryBackends, ToolError, ToolHandler, ToolRegistry, ToolSummary,
    };
    pub use crate::types::{RequestId, SandboxId};

    pub use serde_json::json;
    pub use std::sync::Arc;
}
