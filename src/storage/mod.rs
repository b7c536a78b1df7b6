//! Host-side collaborators: object storage, the persisted tool record
//! store and the distributed lock.
//!
//! The runtime only depends on the traits in this module. Two backends
//! ship with the crate:
//!
//! - **memory**: in-process maps, used by tests and single-node setups
//! - **fs**: a directory-backed object store for local development
//!
//! Production deployments plug in S3/MinIO clients, a document database
//! and a shared lock service behind the same traits.

mod error;
mod fs;
mod memory;
mod retry;

pub use error::{StorageError, StorageErrorKind};
pub use fs::FsObjectStore;
pub use memory::{MemoryLock, MemoryObjectStore, MemoryRecordStore};
pub use retry::{retry_with_backoff, BackoffPolicy};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// A stream of downloaded object chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StorageError>>;

/// Metadata attached to an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// Key prefix the object is stored under
    pub prefix: String,
    /// Original file name
    pub filename: String,
    /// MIME type
    pub content_type: String,
}

impl ObjectMetadata {
    /// Creates object metadata.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            filename: filename.into(),
            content_type: content_type.into(),
        }
    }

    /// The object name this metadata maps to (`<prefix>/<filename>`).
    #[must_use]
    pub fn object_name(&self) -> String {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", prefix, self.filename)
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    /// URL clients can fetch the object from
    pub access_url: String,
    /// Name of the object within the store
    pub object_name: String,
}

/// Object storage used for plugin packages, static assets and files
/// produced by tools.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Stores `bytes` and returns where it can be reached.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> Result<UploadedObject, StorageError>;

    /// Streams an object's content.
    async fn download(&self, object_name: &str) -> Result<ByteStream, StorageError>;

    /// Deletes an object. Deleting a missing object is not an error.
    async fn delete(&self, object_name: &str) -> Result<(), StorageError>;

    /// Lists object names starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Kind of persisted plugin record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordType {
    /// An uploaded tool or toolset package
    Tool,
}

/// A persisted record pointing at an uploaded tool package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecord {
    /// The toolId exposed by the package
    pub tool_id: String,
    /// Object name of the package in the plugin store
    pub object_name: String,
    /// Record type
    #[serde(rename = "type")]
    pub record_type: RecordType,
}

impl ToolRecord {
    /// Creates a tool record.
    #[must_use]
    pub fn tool(tool_id: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            object_name: object_name.into(),
            record_type: RecordType::Tool,
        }
    }
}

/// Persistent record store for uploaded plugins.
#[async_trait]
pub trait RecordStore: Send + Sync + Debug {
    /// Returns all records of the given type.
    async fn find_all(&self, record_type: RecordType) -> Result<Vec<ToolRecord>, StorageError>;

    /// Inserts or replaces the record for `record.tool_id`.
    async fn upsert(&self, record: ToolRecord) -> Result<(), StorageError>;

    /// Removes the record for `tool_id`.
    async fn delete(&self, tool_id: &str) -> Result<(), StorageError>;
}

/// Auto-expiring lock shared by all host processes.
#[async_trait]
pub trait DistributedLock: Send + Sync + Debug {
    /// Tries to take `name` for `ttl`. Returns `false` when another holder
    /// still owns it.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<bool, StorageError>;
}
