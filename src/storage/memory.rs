//! In-process collaborator backends.

use super::{
    ByteStream, DistributedLock, ObjectMetadata, ObjectStore, RecordStore, RecordType,
    StorageError, ToolRecord, UploadedObject,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Chunk size used when streaming downloads.
const DOWNLOAD_CHUNK: usize = 64 * 1024;

fn poisoned(what: &str) -> StorageError {
    StorageError::operation_failed(what, "in-memory store lock poisoned")
}

/// Object store keeping every object in a map.
#[derive(Debug)]
pub struct MemoryObjectStore {
    base_url: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store whose access URLs start with `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// Inserts an object directly, bypassing upload metadata.
    pub fn insert(&self, object_name: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(object_name.into(), bytes);
        }
    }

    /// Returns a copy of an object's bytes.
    #[must_use]
    pub fn get(&self, object_name: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(object_name).cloned()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://objects")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> Result<UploadedObject, StorageError> {
        let object_name = metadata.object_name();
        self.objects
            .lock()
            .map_err(|_| poisoned("upload"))?
            .insert(object_name.clone(), bytes);
        Ok(UploadedObject {
            access_url: format!("{}/{}", self.base_url.trim_end_matches('/'), object_name),
            object_name,
        })
    }

    async fn download(&self, object_name: &str) -> Result<ByteStream, StorageError> {
        let bytes = self
            .objects
            .lock()
            .map_err(|_| poisoned("download"))?
            .get(object_name)
            .cloned()
            .ok_or_else(|| StorageError::not_found(object_name))?;
        let chunks: Vec<Result<Vec<u8>, StorageError>> = bytes
            .chunks(DOWNLOAD_CHUNK)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn delete(&self, object_name: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .map_err(|_| poisoned("delete"))?
            .remove(object_name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects
            .lock()
            .map_err(|_| poisoned("list"))?
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Record store keeping records in a map keyed by toolId.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, ToolRecord>>,
}

impl MemoryRecordStore {
    /// Creates an empty record store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_all(&self, record_type: RecordType) -> Result<Vec<ToolRecord>, StorageError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| poisoned("find_all"))?
            .values()
            .filter(|r| r.record_type == record_type)
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: ToolRecord) -> Result<(), StorageError> {
        self.records
            .lock()
            .map_err(|_| poisoned("upsert"))?
            .insert(record.tool_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, tool_id: &str) -> Result<(), StorageError> {
        self.records
            .lock()
            .map_err(|_| poisoned("delete"))?
            .remove(tool_id);
        Ok(())
    }
}

/// Lock service with wall-clock expiry, shared by reference.
#[derive(Debug, Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, Instant>>,
}

impl MemoryLock {
    /// Creates a lock service with no held locks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<bool, StorageError> {
        let mut held = self.held.lock().map_err(|_| poisoned("try_acquire"))?;
        let now = Instant::now();
        match held.get(name) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                held.insert(name.to_string(), now + ttl);
                Ok(true)
            }
        }
    }
}
