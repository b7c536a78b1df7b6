//! Core identifier types shared by the registry, the sandbox protocol and
//! the orchestrator.

mod ids;

pub use ids::{InvalidId, RequestId, SandboxId};
