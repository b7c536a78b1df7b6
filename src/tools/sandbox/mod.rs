//! Sandboxed tool execution.
//!
//! A sandbox is an isolated execution context running the worker loop.
//! The host talks to it over an ordered, line-delimited JSON channel:
//!
//! - host → worker: `runTool`, `uploadFileResponse`
//! - worker → host: `uploadFile`, `log`, `stream`, `done`
//!
//! ## Implementations
//!
//! - **ProcessSandboxFactory**: one child process per sandbox (default)
//! - **InProcessSandboxFactory**: one tokio task per sandbox, no isolation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toolbox_runtime::tools::sandbox::{PoolConfig, ProcessSandboxFactory, SandboxConfig, SandboxPool};
//!
//! let factory = ProcessSandboxFactory::from_config(&SandboxConfig::default())?;
//! let pool = SandboxPool::new(Arc::new(factory), PoolConfig::default())?;
//! pool.warm().await?;
//! ```

pub mod config;
mod context;
mod in_process;
mod pool;
mod process;
pub mod protocol;
mod relay;
pub(crate) mod traits;
mod worker;

pub use config::{PoolConfig, RelayConfig, SandboxConfig, SandboxMode};
pub use context::{FileUpload, InvocationContext};
pub use in_process::InProcessSandboxFactory;
pub use pool::{PoolMetrics, SandboxPool};
pub use process::{apply_memory_limit_from_env, ProcessSandboxFactory, MEMORY_LIMIT_ENV};
pub use protocol::{
    AppInfo, FilePayload, HostMessage, RunTool, SystemVar, ToolInfo, ToolOutcome, UploadFile,
    UploadFileResponse, UploadResult, UserInfo, WorkerMessage,
};
pub use relay::RelayTable;
pub use traits::{
    Sandbox, SandboxFactory, SandboxFactoryFuture, SandboxHandle, SandboxState, TerminateFuture,
};
pub use worker::WorkerRuntime;
