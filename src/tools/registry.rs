//! Tool registry.
//!
//! Holds three collections of descriptors: builtins scanned from a fixed
//! directory, uploaded tools reconciled against the record store, and
//! ephemeral dev tools. Each collection is rebuilt off to the side and
//! swapped in whole, so a reader's [`RegistrySnapshot`] never mixes an old
//! and a new version of the same collection.

use crate::storage::{
    retry_with_backoff, BackoffPolicy, ByteStream, DistributedLock, ObjectMetadata, ObjectStore, RecordStore,
    RecordType, StorageError,
};
use crate::tools::definition::{Descriptor, ToolSummary};
use crate::tools::error::ToolError;
use crate::tools::loader::{module_files, IconResolver, ModuleLoader, MODULE_EXTENSION};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Lock name guarding uploaded-tool reconciliation.
pub const UPLOAD_REFRESH_LOCK: &str = "toolbox:refresh-uploaded";

/// Default lock TTL (60 seconds).
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Registry locations and reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Directory scanned for builtin manifests
    pub builtin_dir: PathBuf,
    /// Local cache of uploaded manifests
    pub upload_dir: PathBuf,
    /// TTL of the reconciliation lock
    pub lock_ttl: Duration,
    /// Backoff for record store reads
    pub backoff: BackoffPolicy,
}

impl RegistryConfig {
    /// Creates a configuration with default lock and backoff settings.
    #[must_use]
    pub fn new(builtin_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            builtin_dir: builtin_dir.into(),
            upload_dir: upload_dir.into(),
            lock_ttl: DEFAULT_LOCK_TTL,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Sets the lock TTL.
    #[must_use]
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the record store backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Collaborators used to reconcile uploaded tools.
#[derive(Debug, Clone)]
pub struct RegistryBackends {
    /// Plugin package and asset storage
    pub objects: Arc<dyn ObjectStore>,
    /// Persisted upload records
    pub records: Arc<dyn RecordStore>,
    /// Cross-process refresh lock
    pub lock: Arc<dyn DistributedLock>,
}

/// Result of a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The collection was rebuilt and swapped
    Refreshed {
        /// Local files deleted
        removed: usize,
        /// Packages downloaded
        fetched: usize,
        /// Descriptors in the new collection
        total: usize,
    },
    /// Another refresh holds the lock; nothing changed
    Skipped,
}

impl RefreshOutcome {
    /// Returns true when the refresh was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Result of registering dev tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevRegistration {
    /// Registered dev toolIds, in load order
    pub tool_ids: Vec<String>,
    /// Static assets uploaded
    pub assets_uploaded: usize,
}

type Collection = Arc<Vec<Descriptor>>;

/// Consistent read view of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    builtins: Collection,
    uploaded: Collection,
    dev: Collection,
    dev_ids: Arc<HashSet<String>>,
}

impl RegistrySnapshot {
    fn all(&self) -> impl Iterator<Item = &Descriptor> {
        self.builtins
            .iter()
            .chain(self.uploaded.iter())
            .chain(self.dev.iter())
    }

    /// Finds a descriptor; builtins win over uploaded, uploaded over dev.
    #[must_use]
    pub fn get_tool(&self, tool_id: &str) -> Option<&Descriptor> {
        self.all().find(|d| d.tool_id() == tool_id)
    }

    /// All reachable descriptors, in lookup order. A toolId shadowed by
    /// an earlier collection is listed once.
    #[must_use]
    pub fn list(&self) -> Vec<&Descriptor> {
        let mut seen = HashSet::new();
        self.all().filter(|d| seen.insert(d.tool_id())).collect()
    }

    /// Returns true for registered dev tools.
    #[must_use]
    pub fn is_dev(&self, tool_id: &str) -> bool {
        self.dev_ids.contains(tool_id)
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builtins.is_empty() && self.uploaded.is_empty() && self.dev.is_empty()
    }
}

/// Owner of the tool collections.
#[derive(Debug)]
pub struct ToolRegistry {
    config: RegistryConfig,
    loader: Arc<ModuleLoader>,
    backends: Option<RegistryBackends>,
    builtins: RwLock<Collection>,
    uploaded: RwLock<Collection>,
    dev: RwLock<Collection>,
    dev_ids: RwLock<Arc<HashSet<String>>>,
    builtin_refresh: Mutex<()>,
    uploaded_refresh: Mutex<()>,
    dev_refresh: Mutex<()>,
}

fn read(lock: &RwLock<Collection>) -> Collection {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn swap(lock: &RwLock<Collection>, next: Vec<Descriptor>) {
    let next = Arc::new(next);
    match lock.write() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

/// Drops repeated toolIds, keeping the first occurrence.
fn dedupe(descriptors: Vec<Descriptor>, collection: &str) -> Vec<Descriptor> {
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter(|d| {
            let fresh = seen.insert(d.tool_id().to_string());
            if !fresh {
                tracing::warn!(
                    collection,
                    tool_id = d.tool_id(),
                    file = %d.meta().tool_filename,
                    "Duplicate toolId ignored"
                );
            }
            fresh
        })
        .collect()
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("md") => "text/markdown",
        _ => "application/octet-stream",
    }
}

impl ToolRegistry {
    /// Creates an empty registry without remote backends.
    #[must_use]
    pub fn new(config: RegistryConfig, loader: Arc<ModuleLoader>) -> Self {
        Self {
            config,
            loader,
            backends: None,
            builtins: RwLock::default(),
            uploaded: RwLock::default(),
            dev: RwLock::default(),
            dev_ids: RwLock::default(),
            builtin_refresh: Mutex::new(()),
            uploaded_refresh: Mutex::new(()),
            dev_refresh: Mutex::new(()),
        }
    }

    /// Attaches the collaborators used by uploaded-tool reconciliation
    /// and dev asset upload.
    #[must_use]
    pub fn with_backends(mut self, backends: RegistryBackends) -> Self {
        self.backends = Some(backends);
        self
    }

    /// The loader used for all collections.
    #[must_use]
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// The registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Takes a consistent read view.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let dev_ids = match self.dev_ids.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        RegistrySnapshot {
            builtins: read(&self.builtins),
            uploaded: read(&self.uploaded),
            dev: read(&self.dev),
            dev_ids,
        }
    }

    /// Looks up one descriptor by toolId.
    #[must_use]
    pub fn get_tool(&self, tool_id: &str) -> Option<Descriptor> {
        self.snapshot().get_tool(tool_id).cloned()
    }

    /// Summaries of every registered descriptor.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolSummary> {
        let snapshot = self.snapshot();
        snapshot
            .list()
            .into_iter()
            .map(|d| {
                let meta = d.meta();
                ToolSummary {
                    tool_id: meta.tool_id.clone(),
                    name: meta.name.clone(),
                    version: meta.version.clone(),
                    icon: meta.icon.clone(),
                    tags: meta.tags.clone(),
                    parent_id: d.parent_id().map(str::to_string),
                    is_toolset: d.is_toolset(),
                    is_dev: snapshot.is_dev(&meta.tool_id),
                }
            })
            .collect()
    }

    /// Rescans the builtin directory and swaps the builtin collection.
    pub async fn refresh_builtins(&self) -> RefreshOutcome {
        let _guard = self.builtin_refresh.lock().await;
        let descriptors = dedupe(self.loader.scan_dir(&self.config.builtin_dir).await, "builtin");
        let total = descriptors.len();
        swap(&self.builtins, descriptors);
        tracing::info!(total, dir = %self.config.builtin_dir.display(), "Builtin tools loaded");
        RefreshOutcome::Refreshed {
            removed: 0,
            fetched: 0,
            total,
        }
    }

    /// Reloads the uploaded collection from the local upload directory.
    pub async fn reload_uploaded(&self) -> usize {
        let descriptors = dedupe(self.loader.scan_dir(&self.config.upload_dir).await, "uploaded");
        let total = descriptors.len();
        swap(&self.uploaded, descriptors);
        total
    }

    /// Reloads the uploaded collection every `interval` on a background task.
    ///
    /// Workers use this to follow packages the host installs after they
    /// started. The first reload happens one interval from now.
    pub fn spawn_uploaded_reload(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let total = registry.reload_uploaded().await;
                tracing::trace!(total, "Uploaded tools reloaded");
            }
        })
    }

    /// Reconciles uploaded tools against the record store.
    ///
    /// Local packages without a record are deleted, recorded packages
    /// missing locally are downloaded, then the collection is reloaded
    /// and swapped. Skipped when another refresh holds the lock. Without
    /// backends only the local reload happens.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock or record store fail permanently.
    pub async fn refresh_uploaded(&self) -> Result<RefreshOutcome, ToolError> {
        let Ok(_guard) = self.uploaded_refresh.try_lock() else {
            tracing::debug!("Uploaded refresh already running in this process");
            return Ok(RefreshOutcome::Skipped);
        };

        let Some(backends) = &self.backends else {
            let total = self.reload_uploaded().await;
            return Ok(RefreshOutcome::Refreshed {
                removed: 0,
                fetched: 0,
                total,
            });
        };

        if !backends
            .lock
            .try_acquire(UPLOAD_REFRESH_LOCK, self.config.lock_ttl)
            .await?
        {
            tracing::debug!(lock = UPLOAD_REFRESH_LOCK, "Uploaded refresh skipped, lock held");
            return Ok(RefreshOutcome::Skipped);
        }

        let records = retry_with_backoff("find_all", self.config.backoff, || {
            backends.records.find_all(RecordType::Tool)
        })
        .await?;
        let recorded: HashSet<&str> = records.iter().map(|r| r.tool_id.as_str()).collect();

        tokio::fs::create_dir_all(&self.config.upload_dir)
            .await
            .map_err(|e| ToolError::internal(format!("failed to create upload dir: {e}")))?;

        let mut removed = 0;
        let mut local: HashMap<String, PathBuf> = HashMap::new();
        for path in module_files(&self.config.upload_dir).await {
            match self.loader.module_tool_id(&path).await {
                Ok(tool_id) if recorded.contains(tool_id.as_str()) => {
                    local.insert(tool_id, path);
                }
                outcome => {
                    if let Err(e) = outcome {
                        tracing::warn!(path = %path.display(), error = %e, "Removing unloadable package");
                    } else {
                        tracing::info!(path = %path.display(), "Removing package without record");
                    }
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "Failed to remove package")
                        }
                    }
                }
            }
        }

        let mut fetched = 0;
        for record in records.iter().filter(|r| !local.contains_key(&r.tool_id)) {
            match self.fetch_package(backends.objects.as_ref(), &record.object_name).await {
                Ok(path) => match self.loader.module_tool_id(&path).await {
                    Ok(tool_id) => {
                        if tool_id != record.tool_id {
                            tracing::warn!(
                                record = %record.tool_id,
                                package = %tool_id,
                                "Package toolId differs from its record"
                            );
                        }
                        fetched += 1;
                    }
                    Err(e) => {
                        tracing::warn!(tool_id = %record.tool_id, error = %e, "Fetched package does not load");
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        tool_id = %record.tool_id,
                        object = %record.object_name,
                        error = %e,
                        "Failed to fetch package"
                    );
                }
            }
        }

        let total = self.reload_uploaded().await;
        tracing::info!(removed, fetched, total, "Uploaded tools reconciled");
        Ok(RefreshOutcome::Refreshed {
            removed,
            fetched,
            total,
        })
    }

    async fn fetch_package(
        &self,
        objects: &dyn ObjectStore,
        object_name: &str,
    ) -> Result<PathBuf, ToolError> {
        let filename = package_filename(object_name).ok_or_else(|| {
            StorageError::operation_failed("download", format!("no file name in '{object_name}'"))
        })?;
        let target = self.config.upload_dir.join(filename);
        let partial = target.with_extension("part");

        let stream = objects.download(object_name).await?;
        let written = match write_partial(stream, &partial).await {
            Ok(()) => tokio::fs::rename(&partial, &target)
                .await
                .map_err(|e| ToolError::from(StorageError::operation_failed("download", e.to_string()))),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        Ok(target)
    }

    /// Registers dev tools from manifest files or directories.
    ///
    /// Replaces the previous dev collection. Ids already provided by
    /// builtins or uploaded tools are skipped. Unless `hot_reload` is set,
    /// `logo.*` and `README.md` next to each manifest are uploaded once
    /// under the tool's asset prefix.
    ///
    /// # Errors
    ///
    /// Returns an error when an asset upload fails.
    pub async fn register_dev_tools(
        &self,
        paths: &[PathBuf],
        hot_reload: bool,
    ) -> Result<DevRegistration, ToolError> {
        let _guard = self.dev_refresh.lock().await;

        let mut manifests = Vec::new();
        for path in paths {
            if path.is_dir() {
                manifests.extend(module_files(path).await);
            } else {
                manifests.push(path.clone());
            }
        }

        let taken: HashSet<String> = {
            let builtins = read(&self.builtins);
            let uploaded = read(&self.uploaded);
            builtins
                .iter()
                .chain(uploaded.iter())
                .map(|d| d.tool_id().to_string())
                .collect()
        };

        let mut descriptors = Vec::new();
        let mut roots: Vec<(String, PathBuf)> = Vec::new();
        for manifest in &manifests {
            for descriptor in self.loader.load_tool_module(manifest).await {
                if taken.contains(descriptor.tool_id()) {
                    tracing::warn!(
                        tool_id = descriptor.tool_id(),
                        "Dev tool shadows a registered tool, skipped"
                    );
                    continue;
                }
                if descriptor.parent_id().is_none() {
                    roots.push((descriptor.tool_id().to_string(), manifest.clone()));
                }
                descriptors.push(descriptor);
            }
        }

        let descriptors = dedupe(descriptors, "dev");
        let tool_ids: Vec<String> = descriptors.iter().map(|d| d.tool_id().to_string()).collect();
        let ids: HashSet<String> = tool_ids.iter().cloned().collect();
        swap(&self.dev, descriptors);
        match self.dev_ids.write() {
            Ok(mut guard) => *guard = Arc::new(ids),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(ids),
        }

        let mut assets_uploaded = 0;
        if !hot_reload {
            if let Some(backends) = &self.backends {
                for (tool_id, manifest) in &roots {
                    assets_uploaded += upload_assets(backends.objects.as_ref(), tool_id, manifest).await?;
                }
            }
        }

        tracing::info!(
            count = tool_ids.len(),
            assets_uploaded,
            hot_reload,
            "Dev tools registered"
        );
        Ok(DevRegistration {
            tool_ids,
            assets_uploaded,
        })
    }
}

async fn upload_assets(
    objects: &dyn ObjectStore,
    tool_id: &str,
    manifest: &Path,
) -> Result<usize, ToolError> {
    let Some(dir) = manifest.parent() else {
        return Ok(0);
    };
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };

    let prefix = IconResolver::asset_prefix(tool_id);
    let mut uploaded = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let object_filename = if name == "README.md" {
            "README.md"
        } else if path.file_stem().is_some_and(|s| s == "logo") {
            "logo"
        } else {
            continue;
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::internal(format!("failed to read {}: {e}", path.display())))?;
        let metadata = ObjectMetadata::new(&prefix, object_filename, content_type_for(&path));
        objects.upload(bytes, metadata).await?;
        tracing::debug!(tool_id, asset = name, "Dev asset uploaded");
        uploaded += 1;
    }
    Ok(uploaded)
}

/// Local file name for a downloaded package.
///
/// Always ends in the manifest extension so the upload-dir scan sees it.
fn package_filename(object_name: &str) -> Option<String> {
    let path = Path::new(object_name);
    let name = path.file_name()?.to_string_lossy();
    if path.extension().is_some_and(|ext| ext == MODULE_EXTENSION) {
        Some(name.into_owned())
    } else {
        Some(format!("{name}.{MODULE_EXTENSION}"))
    }
}

async fn write_partial(mut stream: ByteStream, partial: &Path) -> Result<(), ToolError> {
    let io = |e: std::io::Error| ToolError::from(StorageError::operation_failed("download", e.to_string()));
    let mut file = tokio::fs::File::create(partial).await.map_err(io)?;
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await.map_err(io)?;
    }
    file.flush().await.map_err(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryLock, MemoryObjectStore, MemoryRecordStore, ToolRecord};
    use tempfile::TempDir;

    fn manifest(tool_id: &str) -> String {
        format!(r#"{{"toolId": "{tool_id}", "name": "{tool_id}", "versionList": [{{"value": "1"}}]}}"#)
    }

    struct Fixture {
        root: TempDir,
        builtin_dir: PathBuf,
        upload_dir: PathBuf,
        objects: Arc<MemoryObjectStore>,
        records: Arc<MemoryRecordStore>,
        lock: Arc<MemoryLock>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let builtin_dir = dir.path().join("builtin");
            let upload_dir = dir.path().join("uploaded");
            std::fs::create_dir_all(&builtin_dir).unwrap();
            std::fs::create_dir_all(&upload_dir).unwrap();
            Self {
                root: dir,
                builtin_dir,
                upload_dir,
                objects: Arc::new(MemoryObjectStore::default()),
                records: Arc::new(MemoryRecordStore::new()),
                lock: Arc::new(MemoryLock::new()),
            }
        }

        fn registry(&self) -> ToolRegistry {
            ToolRegistry::new(
                RegistryConfig::new(&self.builtin_dir, &self.upload_dir),
                Arc::new(ModuleLoader::default()),
            )
            .with_backends(RegistryBackends {
                objects: self.objects.clone(),
                records: self.records.clone(),
                lock: self.lock.clone(),
            })
        }
    }

    #[tokio::test]
    async fn builtins_are_swapped_whole() {
        let fx = Fixture::new();
        std::fs::write(fx.builtin_dir.join("a.json"), manifest("a")).unwrap();
        let registry = fx.registry();

        let before = registry.snapshot();
        assert!(before.is_empty());

        registry.refresh_builtins().await;
        assert!(registry.get_tool("a").is_some());
        // A snapshot taken earlier keeps its view.
        assert!(before.get_tool("a").is_none());
    }

    #[tokio::test]
    async fn duplicates_keep_first_and_builtins_win() {
        let fx = Fixture::new();
        std::fs::write(fx.builtin_dir.join("a.json"), manifest("shared")).unwrap();
        std::fs::write(fx.builtin_dir.join("b.json"), manifest("shared")).unwrap();
        std::fs::write(fx.upload_dir.join("c.json"), manifest("shared")).unwrap();
        let registry = ToolRegistry::new(
            RegistryConfig::new(&fx.builtin_dir, &fx.upload_dir),
            Arc::new(ModuleLoader::default()),
        );
        registry.refresh_builtins().await;
        registry.refresh_uploaded().await.unwrap();

        let tool = registry.get_tool("shared").unwrap();
        assert!(tool.meta().tool_filename.ends_with("a.json"));
        assert_eq!(registry.list_tools().len(), 1);
    }

    #[tokio::test]
    async fn refresh_uploaded_reconciles_against_records() {
        let fx = Fixture::new();
        std::fs::write(fx.upload_dir.join("stale.json"), manifest("stale")).unwrap();
        std::fs::write(fx.upload_dir.join("kept.json"), manifest("kept")).unwrap();
        std::fs::write(fx.upload_dir.join("broken.json"), "{").unwrap();
        fx.records.upsert(ToolRecord::tool("kept", "plugins/kept.json")).await.unwrap();
        fx.records.upsert(ToolRecord::tool("remote", "plugins/remote.json")).await.unwrap();
        fx.objects.insert("plugins/remote.json", manifest("remote").into_bytes());

        let registry = fx.registry();
        let outcome = registry.refresh_uploaded().await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Refreshed {
                removed: 2,
                fetched: 1,
                total: 2
            }
        );
        assert!(!fx.upload_dir.join("stale.json").exists());
        assert!(fx.upload_dir.join("remote.json").exists());
        assert!(registry.get_tool("remote").is_some());
        assert!(registry.get_tool("stale").is_none());
    }

    #[tokio::test]
    async fn contended_lock_skips() {
        let fx = Fixture::new();
        fx.lock.try_acquire(UPLOAD_REFRESH_LOCK, Duration::from_secs(60)).await.unwrap();
        let outcome = fx.registry().refresh_uploaded().await.unwrap();
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn missing_remote_package_is_not_fatal() {
        let fx = Fixture::new();
        fx.records.upsert(ToolRecord::tool("ghost", "plugins/ghost.json")).await.unwrap();
        let outcome = fx.registry().refresh_uploaded().await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Refreshed {
                removed: 0,
                fetched: 0,
                total: 0
            }
        );
    }

    #[tokio::test]
    async fn extensionless_package_loads_and_stays_local() {
        let fx = Fixture::new();
        fx.records.upsert(ToolRecord::tool("remote", "plugins/remote-abc123")).await.unwrap();
        fx.objects.insert("plugins/remote-abc123", manifest("remote").into_bytes());
        let registry = fx.registry();

        let first = registry.refresh_uploaded().await.unwrap();
        assert_eq!(
            first,
            RefreshOutcome::Refreshed {
                removed: 0,
                fetched: 1,
                total: 1
            }
        );
        assert!(registry.get_tool("remote").is_some());
        assert!(fx.upload_dir.join("remote-abc123.json").exists());

        // Lock expiry is wall-clock based; a fresh lock lets the second pass run.
        let again = ToolRegistry::new(
            RegistryConfig::new(&fx.builtin_dir, &fx.upload_dir),
            Arc::new(ModuleLoader::default()),
        )
        .with_backends(RegistryBackends {
            objects: fx.objects.clone(),
            records: fx.records.clone(),
            lock: Arc::new(MemoryLock::new()),
        });
        let second = again.refresh_uploaded().await.unwrap();
        assert_eq!(
            second,
            RefreshOutcome::Refreshed {
                removed: 0,
                fetched: 0,
                total: 1
            }
        );
    }

    #[tokio::test]
    async fn failed_install_leaves_no_partial_file() {
        let fx = Fixture::new();
        fx.records.upsert(ToolRecord::tool("remote", "plugins/remote.json")).await.unwrap();
        fx.objects.insert("plugins/remote.json", manifest("remote").into_bytes());
        // A non-empty directory in the way makes the final rename fail.
        let blocker = fx.upload_dir.join("remote.json");
        std::fs::create_dir_all(&blocker).unwrap();
        std::fs::write(blocker.join("keep.txt"), "x").unwrap();

        let outcome = fx.registry().refresh_uploaded().await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Refreshed {
                removed: 0,
                fetched: 0,
                total: 0
            }
        );
        assert!(!fx.upload_dir.join("remote.part").exists());
    }

    #[tokio::test]
    async fn periodic_reload_picks_up_new_packages() {
        let fx = Fixture::new();
        let registry = Arc::new(fx.registry());
        let reload = registry.spawn_uploaded_reload(Duration::from_millis(20));

        std::fs::write(fx.upload_dir.join("late.json"), manifest("late")).unwrap();
        let mut found = false;
        for _ in 0..50 {
            if registry.get_tool("late").is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        reload.abort();
        assert!(found);
    }

    #[test]
    fn package_filename_keeps_manifest_extension() {
        assert_eq!(package_filename("plugins/a.json").as_deref(), Some("a.json"));
        assert_eq!(package_filename("plugins/a-1f3e").as_deref(), Some("a-1f3e.json"));
        assert_eq!(package_filename("plugins/a.zip").as_deref(), Some("a.zip.json"));
        assert_eq!(package_filename(""), None);
    }

    #[tokio::test]
    async fn dev_tools_upload_assets_unless_hot_reload() {
        let fx = Fixture::new();
        let dev_dir = fx.root.path().join("dev/weather");
        std::fs::create_dir_all(&dev_dir).unwrap();
        std::fs::write(dev_dir.join("weather.json"), manifest("weather")).unwrap();
        std::fs::write(dev_dir.join("logo.svg"), "<svg/>").unwrap();
        std::fs::write(dev_dir.join("README.md"), "# Weather").unwrap();
        std::fs::write(dev_dir.join("notes.txt"), "ignored").unwrap();

        let registry = fx.registry();
        let registration = registry
            .register_dev_tools(&[dev_dir.clone()], false)
            .await
            .unwrap();
        assert_eq!(registration.tool_ids, vec!["weather"]);
        assert_eq!(registration.assets_uploaded, 2);
        assert!(fx.objects.get("system/plugin/tools/weather/logo").is_some());
        assert!(fx.objects.get("system/plugin/tools/weather/README.md").is_some());

        let summaries = registry.list_tools();
        assert!(summaries[0].is_dev);

        let hot = registry.register_dev_tools(&[dev_dir], true).await.unwrap();
        assert_eq!(hot.assets_uploaded, 0);
    }

    #[tokio::test]
    async fn dev_tools_cannot_shadow_builtins() {
        let fx = Fixture::new();
        std::fs::write(fx.builtin_dir.join("a.json"), manifest("a")).unwrap();
        let dev = fx.root.path().join("a-dev.json");
        std::fs::write(&dev, manifest("a")).unwrap();

        let registry = fx.registry();
        registry.refresh_builtins().await;
        let registration = registry.register_dev_tools(&[dev], true).await.unwrap();
        assert!(registration.tool_ids.is_empty());
        assert!(!registry.snapshot().is_dev("a"));
    }
}
