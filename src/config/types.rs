//! Configuration file types.
//!
//! Every section and field has a default, so an empty file (or no file)
//! yields a working local setup:
//!
//! ```toml
//! [registry]
//! builtin_dir = "plugins/builtin"
//! upload_dir = "plugins/uploaded"
//! dev_paths = ["../my-tool"]
//! refresh_interval_secs = 300
//!
//! [sandbox]
//! mode = "process"
//! warm_count = 2
//! invocation_timeout_secs = 60
//!
//! [relay]
//! max_pending = 64
//! response_timeout_secs = 120
//!
//! [storage]
//! root = "storage"
//! base_url = "http://localhost:8080/files"
//!
//! [logging]
//! level = "debug"
//! file = true
//! ```

use crate::error::RuntimeError;
use crate::logging::LoggingConfig;
use crate::storage::BackoffPolicy;
use crate::tools::loader::IconResolver;
use crate::tools::orchestrator::{OrchestratorConfig, DEFAULT_UPLOAD_PREFIX};
use crate::tools::registry::RegistryConfig;
use crate::tools::sandbox::config::{
    DEFAULT_INVOCATION_TIMEOUT, DEFAULT_MAX_EXECUTIONS_BEFORE_RECYCLE, DEFAULT_MAX_IDLE,
    DEFAULT_MAX_PENDING, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_WARM_COUNT,
};
use crate::tools::sandbox::{PoolConfig, RelayConfig, SandboxConfig, SandboxMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub registry: RegistrySection,
    pub sandbox: SandboxSection,
    pub relay: RelaySection,
    pub storage: StorageSection,
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Creates a configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending setting.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        self.sandbox_config()
            .validate()
            .map_err(|e| RuntimeError::configuration("sandbox", e.to_string()))?;
        self.pool_config()
            .validate()
            .map_err(|e| RuntimeError::configuration("sandbox", e.to_string()))?;
        if self.relay.max_pending == 0 {
            return Err(RuntimeError::configuration(
                "relay.max_pending",
                "must be greater than zero",
            ));
        }
        if self.registry.retry_initial_ms == 0 {
            return Err(RuntimeError::configuration(
                "registry.retry_initial_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Registry settings.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        let r = &self.registry;
        RegistryConfig::new(&r.builtin_dir, &r.upload_dir)
            .with_lock_ttl(Duration::from_secs(r.lock_ttl_secs))
            .with_backoff(BackoffPolicy::new(
                Duration::from_millis(r.retry_initial_ms),
                Duration::from_secs(r.retry_max_secs),
            ))
    }

    /// Icon URL resolution for loaded modules.
    #[must_use]
    pub fn icon_resolver(&self) -> IconResolver {
        IconResolver::new(&self.registry.asset_base_url)
    }

    /// Per-sandbox settings.
    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        let s = &self.sandbox;
        let mut config = SandboxConfig::new()
            .with_mode(s.mode)
            .with_invocation_timeout(Duration::from_secs(s.invocation_timeout_secs));
        if let Some(program) = &s.worker_program {
            config = config.with_worker_program(program, s.worker_args.clone());
        }
        if let Some(mb) = s.memory_limit_mb {
            config = config.with_memory_limit(mb.saturating_mul(1024 * 1024));
        }
        config
    }

    /// Pool sizing.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .with_warm_count(self.sandbox.warm_count)
            .with_max_idle(self.sandbox.max_idle)
            .with_max_executions_before_recycle(self.sandbox.max_executions_before_recycle)
    }

    /// Worker-side relay bounds.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig::new(
            self.relay.max_pending,
            Duration::from_secs(self.relay.response_timeout_secs),
        )
    }

    /// Invocation settings.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_invocation_timeout(Duration::from_secs(self.sandbox.invocation_timeout_secs))
            .with_upload_prefix(&self.storage.upload_prefix)
    }
}

/// `[registry]`: where tools come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Directory scanned for builtin tool manifests.
    ///
    /// Default: `plugins/builtin`
    pub builtin_dir: PathBuf,
    /// Directory holding downloaded tool packages.
    ///
    /// Default: `plugins/uploaded`
    pub upload_dir: PathBuf,
    /// Development manifests or directories registered at startup.
    pub dev_paths: Vec<PathBuf>,
    /// Prefix of resolved icon URLs.
    ///
    /// Default: `/imgs`
    pub asset_base_url: String,
    /// Lifetime of the uploaded-refresh lock.
    ///
    /// Default: 60
    pub lock_ttl_secs: u64,
    /// First retry delay for the record store.
    ///
    /// Default: 500
    pub retry_initial_ms: u64,
    /// Longest retry delay for the record store.
    ///
    /// Default: 30
    pub retry_max_secs: u64,
    /// Interval between uploaded refreshes in `watch`.
    ///
    /// Default: 300
    pub refresh_interval_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            builtin_dir: PathBuf::from("plugins/builtin"),
            upload_dir: PathBuf::from("plugins/uploaded"),
            dev_paths: Vec::new(),
            asset_base_url: IconResolver::default().base().to_string(),
            lock_ttl_secs: 60,
            retry_initial_ms: 500,
            retry_max_secs: 30,
            refresh_interval_secs: 300,
        }
    }
}

/// `[sandbox]`: how tool code is isolated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub mode: SandboxMode,
    pub warm_count: usize,
    pub max_idle: usize,
    pub max_executions_before_recycle: u32,
    pub invocation_timeout_secs: u64,
    /// Worker executable; unset re-executes this binary.
    pub worker_program: Option<PathBuf>,
    pub worker_args: Vec<String>,
    /// Address-space limit for worker processes, in MiB.
    pub memory_limit_mb: Option<u64>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            warm_count: DEFAULT_WARM_COUNT,
            max_idle: DEFAULT_MAX_IDLE,
            max_executions_before_recycle: DEFAULT_MAX_EXECUTIONS_BEFORE_RECYCLE,
            invocation_timeout_secs: DEFAULT_INVOCATION_TIMEOUT.as_secs(),
            worker_program: None,
            worker_args: vec!["worker".to_string()],
            memory_limit_mb: None,
        }
    }
}

/// `[relay]`: upload relay bounds inside workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub max_pending: usize,
    pub response_timeout_secs: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            response_timeout_secs: DEFAULT_RESPONSE_TIMEOUT.as_secs(),
        }
    }
}

/// `[storage]`: the local object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory objects are written under.
    ///
    /// Default: `storage`
    pub root: PathBuf,
    /// Prefix of returned access URLs.
    pub base_url: String,
    /// Object prefix for files uploaded by tools.
    ///
    /// Default: `tool-files`
    pub upload_prefix: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
            base_url: "http://localhost:8080/files".to_string(),
            upload_prefix: DEFAULT_UPLOAD_PREFIX.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.builtin_dir, PathBuf::from("plugins/builtin"));
        assert_eq!(config.sandbox.mode, SandboxMode::Process);
        assert_eq!(config.pool_config(), PoolConfig::default());
        assert_eq!(config.relay_config(), RelayConfig::default());
    }

    #[test]
    fn sections_convert_to_runtime_types() {
        let mut config = RuntimeConfig::default();
        config.sandbox.invocation_timeout_secs = 5;
        config.sandbox.memory_limit_mb = Some(256);
        config.sandbox.worker_program = Some(PathBuf::from("/usr/bin/worker"));
        config.storage.upload_prefix = "files".to_string();

        let sandbox = config.sandbox_config();
        assert_eq!(sandbox.invocation_timeout, Duration::from_secs(5));
        assert_eq!(sandbox.memory_limit, Some(256 * 1024 * 1024));
        assert_eq!(sandbox.worker_program, Some(PathBuf::from("/usr/bin/worker")));

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.invocation_timeout, Duration::from_secs(5));
        assert_eq!(orchestrator.upload_prefix, "files");
    }

    #[test]
    fn warm_count_over_max_idle_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.sandbox.warm_count = 10;
        config.sandbox.max_idle = 2;
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("warm_count"));
    }
}
