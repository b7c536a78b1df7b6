//! Tool module loading and parsing.
//!
//! `parse_module` turns a manifest into normalized descriptors without
//! touching the filesystem. `ModuleLoader` reads manifests from disk
//! through a small in-process cache whose key is the path plus the file
//! size. The size is only a cache-buster: two different manifests of the
//! same size at the same path are treated as unchanged until the size
//! moves.

use crate::tools::definition::{
    Descriptor, RawModule, ToolDescriptor, ToolMeta, ToolSetDescriptor,
};
use crate::tools::error::ToolError;
use crate::tools::version::{hash_toolset, hash_version};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// Manifest file extension.
pub const MODULE_EXTENSION: &str = "json";

/// Resolves the fallback icon of a tool from its storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconResolver {
    asset_base_url: String,
}

impl IconResolver {
    /// Creates a resolver for assets served from `asset_base_url`.
    #[must_use]
    pub fn new(asset_base_url: impl Into<String>) -> Self {
        Self {
            asset_base_url: asset_base_url.into(),
        }
    }

    /// The asset base URL.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.asset_base_url
    }

    /// Object-store prefix holding a tool's static assets.
    #[must_use]
    pub fn asset_prefix(tool_id: &str) -> String {
        format!("system/plugin/tools/{tool_id}")
    }

    /// Deterministic logo URL for `tool_id`.
    #[must_use]
    pub fn resolve(&self, tool_id: &str) -> String {
        format!(
            "{}/{}/logo",
            self.asset_base_url.trim_end_matches('/'),
            Self::asset_prefix(tool_id)
        )
    }
}

impl Default for IconResolver {
    fn default() -> Self {
        Self::new("/imgs")
    }
}

/// Metadata a child inherits when it does not set its own.
struct Inherited<'a> {
    tags: &'a [String],
    author: Option<&'a str>,
    course_url: Option<&'a str>,
    icon: &'a str,
}

fn leaf(
    raw: &RawModule,
    filename: &str,
    icons: &IconResolver,
    parent: Option<(&str, &Inherited<'_>)>,
) -> Result<ToolDescriptor, ToolError> {
    if raw.tool_id.is_empty() {
        return Err(ToolError::module_load(filename, "tool module is missing toolId"));
    }
    let version = hash_version(&raw.version_list).ok_or_else(|| {
        ToolError::module_load(
            filename,
            format!("tool '{}' declares no versions", raw.tool_id),
        )
    })?;

    let inherited = parent.map(|(_, i)| i);
    let tags = raw
        .tags
        .clone()
        .or_else(|| inherited.map(|i| i.tags.to_vec()))
        .unwrap_or_default();
    let author = raw
        .author
        .clone()
        .or_else(|| inherited.and_then(|i| i.author.map(str::to_string)));
    let course_url = raw
        .course_url
        .clone()
        .or_else(|| inherited.and_then(|i| i.course_url.map(str::to_string)));
    let icon = raw
        .icon
        .clone()
        .or_else(|| inherited.map(|i| i.icon.to_string()))
        .unwrap_or_else(|| icons.resolve(&raw.tool_id));

    Ok(ToolDescriptor {
        meta: ToolMeta {
            tool_id: raw.tool_id.clone(),
            name: raw.name.clone(),
            description: raw.description.clone(),
            tool_description: raw.tool_description.clone(),
            tags,
            icon,
            author,
            course_url,
            secret_input_config: raw.secret_input_config.clone(),
            tool_filename: filename.to_string(),
            version,
        },
        version_list: raw.version_list.clone(),
        parent_id: parent.map(|(id, _)| id.to_string()),
        entry: raw.entry.clone(),
    })
}

/// Parses a manifest into descriptors.
///
/// A toolset with N children yields N+1 descriptors: the parent first,
/// then each child with `parent_id` set. A leaf module yields one.
///
/// # Errors
///
/// Returns a ModuleLoad error for a missing toolId, an empty leaf
/// version list, or a toolset without children.
pub fn parse_module(
    raw: &RawModule,
    filename: &str,
    icons: &IconResolver,
) -> Result<Vec<Descriptor>, ToolError> {
    let Some(children) = raw.children.as_ref() else {
        return Ok(vec![Descriptor::Tool(leaf(raw, filename, icons, None)?)]);
    };

    if raw.tool_id.is_empty() {
        return Err(ToolError::module_load(filename, "tool module is missing toolId"));
    }
    let child_versions: Vec<&[_]> = children.iter().map(|c| c.version_list.as_slice()).collect();
    let version = hash_toolset(&child_versions).ok_or_else(|| {
        ToolError::module_load(
            filename,
            format!("toolset '{}' has no versioned children", raw.tool_id),
        )
    })?;

    let icon = raw
        .icon
        .clone()
        .unwrap_or_else(|| icons.resolve(&raw.tool_id));
    let tags = raw.tags.clone().unwrap_or_default();
    let inherited = Inherited {
        tags: &tags,
        author: raw.author.as_deref(),
        course_url: raw.course_url.as_deref(),
        icon: &icon,
    };

    let child_descriptors = children
        .iter()
        .map(|child| leaf(child, filename, icons, Some((&raw.tool_id, &inherited))))
        .collect::<Result<Vec<_>, _>>()?;

    let parent = ToolSetDescriptor {
        meta: ToolMeta {
            tool_id: raw.tool_id.clone(),
            name: raw.name.clone(),
            description: raw.description.clone(),
            tool_description: raw.tool_description.clone(),
            tags: tags.clone(),
            icon: icon.clone(),
            author: raw.author.clone(),
            course_url: raw.course_url.clone(),
            secret_input_config: raw.secret_input_config.clone(),
            tool_filename: filename.to_string(),
            version,
        },
        children: child_descriptors.clone(),
    };

    let mut descriptors = Vec::with_capacity(child_descriptors.len() + 1);
    descriptors.push(Descriptor::ToolSet(parent));
    descriptors.extend(child_descriptors.into_iter().map(Descriptor::Tool));
    Ok(descriptors)
}

/// Loads manifests from disk with a size-fingerprinted cache.
#[derive(Debug, Default)]
pub struct ModuleLoader {
    icons: IconResolver,
    /// `"<path>?size=<bytes>"` → parsed manifest
    cache: Mutex<HashMap<String, Arc<RawModule>>>,
}

impl ModuleLoader {
    /// Creates a loader resolving fallback icons with `icons`.
    #[must_use]
    pub fn new(icons: IconResolver) -> Self {
        Self {
            icons,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The icon resolver used for fallbacks.
    #[must_use]
    pub fn icons(&self) -> &IconResolver {
        &self.icons
    }

    fn cache_key(path: &Path, size: u64) -> String {
        format!("{}?size={}", path.display(), size)
    }

    /// Number of cached manifests.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    async fn read_raw(&self, path: &Path) -> Result<Arc<RawModule>, ToolError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ToolError::module_load(path, e.to_string()))?;
        let key = Self::cache_key(path, metadata.len());

        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ToolError::module_load(path, e.to_string()))?;
        let raw: RawModule = serde_json::from_slice(&bytes)
            .map_err(|e| ToolError::module_load(path, format!("invalid manifest: {e}")))?;
        if raw.tool_id.is_empty() {
            return Err(ToolError::module_load(path, "tool module is missing toolId"));
        }

        let raw = Arc::new(raw);
        if let Ok(mut cache) = self.cache.lock() {
            let stale_prefix = format!("{}?size=", path.display());
            cache.retain(|k, _| !k.starts_with(&stale_prefix));
            cache.insert(key, raw.clone());
        }
        Ok(raw)
    }

    /// Loads and parses one module.
    ///
    /// # Errors
    ///
    /// Returns a ModuleLoad error when the file cannot be read or parsed.
    pub async fn try_load_tool_module(&self, path: &Path) -> Result<Vec<Descriptor>, ToolError> {
        let raw = self.read_raw(path).await?;
        parse_module(&raw, &path.to_string_lossy(), &self.icons)
    }

    /// Loads one module, logging failures and yielding no descriptors.
    pub async fn load_tool_module(&self, path: &Path) -> Vec<Descriptor> {
        match self.try_load_tool_module(path).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load tool module");
                Vec::new()
            }
        }
    }

    /// Recovers the toolId a module file exposes.
    ///
    /// # Errors
    ///
    /// Returns a ModuleLoad error when the file cannot be read or parsed.
    pub async fn module_tool_id(&self, path: &Path) -> Result<String, ToolError> {
        Ok(self.read_raw(path).await?.tool_id.clone())
    }

    /// Loads every manifest under `dir` (depth ≤ 2), ordered by path.
    ///
    /// A missing directory yields no descriptors.
    pub async fn scan_dir(&self, dir: &Path) -> Vec<Descriptor> {
        let mut descriptors = Vec::new();
        for path in module_files(dir).await {
            descriptors.extend(self.load_tool_module(&path).await);
        }
        descriptors
    }
}

/// Lists manifest files under `dir` (depth ≤ 2), skipping hidden entries.
pub async fn module_files(dir: &Path) -> Vec<PathBuf> {
    let dir = dir.to_path_buf();
    let listed = tokio::task::spawn_blocking(move || {
        let mut files: Vec<PathBuf> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == MODULE_EXTENSION))
            .collect();
        files.sort();
        files
    })
    .await;

    match listed {
        Ok(files) => files,
        Err(e) => {
            tracing::error!(error = %e, "Module directory scan panicked");
            Vec::new()
        }
    }
}
