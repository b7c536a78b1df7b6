//! Tool system for the toolbox runtime.
//!
//! This module provides everything between a tool manifest on disk and a
//! finished invocation:
//!
//! - **Loader**: parses JSON manifests into tool and toolset descriptors
//! - **Registry**: builtin, uploaded and development tool collections
//! - **Sandbox**: isolated workers running tool code, with the upload relay
//! - **Orchestrator**: drives one invocation through a pooled sandbox
//!
//! ## Architecture
//!
//! ```text
//! +--------------------+   runTool / uploadFileResponse   +--------------------+
//! |    Orchestrator    | -------------------------------> |   WorkerRuntime    |
//! |                    |                                  |                    |
//! |  SandboxPool       | <------------------------------- |  ToolRegistry      |
//! |  ObjectStore       |   uploadFile / log / stream /    |  HandlerTable      |
//! +--------------------+   done                           +--------------------+
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toolbox_runtime::prelude::*;
//!
//! let outcome = orchestrator
//!     .submit(InvocationRequest::new("core/echo", json!({"text": "hi"})), |chunk| {
//!         println!("{chunk}");
//!     })
//!     .await;
//! ```

pub mod builtins;
pub mod definition;
mod error;
pub mod handler;
pub mod loader;
pub mod orchestrator;
pub mod refresher;
pub mod registry;
pub mod sandbox;
pub mod schema;
pub mod version;

pub use definition::{
    Descriptor, InputSpec, OutputSpec, RawModule, ToolDescriptor, ToolEntry, ToolMeta,
    ToolSetDescriptor, ToolSummary, ValueType, VersionEntry,
};
pub use error::{ToolError, ToolErrorKind};
pub use handler::{CommandHandler, HandlerTable, ToolHandler};
pub use loader::{parse_module, IconResolver, ModuleLoader};
pub use orchestrator::{InvocationMetrics, InvocationRequest, Orchestrator, OrchestratorConfig};
pub use refresher::{RefreshBuiltins, RefreshUploaded, RegistryRefresher};
pub use registry::{
    DevRegistration, RefreshOutcome, RegistryBackends, RegistryConfig, RegistrySnapshot,
    ToolRegistry,
};
pub use schema::{validate_input, validate_output, SchemaViolation};
pub use version::{hash_toolset, hash_version, ContentHash};
