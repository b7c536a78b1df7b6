//! Directory-backed object store for local development.

use super::{ByteStream, ObjectMetadata, ObjectStore, StorageError, UploadedObject};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Object store that maps object names onto files under a root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    base_url: String,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`; access URLs start with `base_url`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, object_name: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(object_name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if object_name.is_empty() || escapes {
            return Err(StorageError::operation_failed(
                "resolve",
                format!("invalid object name '{object_name}'"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(operation: &str, e: &std::io::Error) -> StorageError {
    StorageError::operation_failed(operation, e.to_string())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> Result<UploadedObject, StorageError> {
        let object_name = metadata.object_name();
        let path = self.path_for(&object_name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("upload", &e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error("upload", &e))?;
        Ok(UploadedObject {
            access_url: format!("{}/{}", self.base_url.trim_end_matches('/'), object_name),
            object_name,
        })
    }

    async fn download(&self, object_name: &str) -> Result<ByteStream, StorageError> {
        let path = self.path_for(object_name)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::not_found(object_name)
            } else {
                io_error("download", &e)
            }
        })?;
        Ok(futures::stream::once(async move { Ok(bytes) }).boxed())
    }

    async fn delete(&self, object_name: &str) -> Result<(), StorageError> {
        let path = self.path_for(object_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete", &e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut names: Vec<String> = WalkDir::new(&root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| {
                    let relative = e.path().strip_prefix(&root).ok()?;
                    let name = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    name.starts_with(&prefix).then_some(name)
                })
                .collect();
            names.sort();
            names
        })
        .await
        .map_err(|e| StorageError::operation_failed("list", e.to_string()))
    }
}
