//! In-memory object store.
//!
//! Provides a thread-safe in-memory bucket for testing and dry runs.
//! Objects are not persisted across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::RwLock;

use super::{
    DEFAULT_PAGE_SIZE, ObjectInfo, ObjectListing, ObjectStore, StorageError, TRANSFER_CHUNK_SIZE,
    TransferInfo, TransferProgress,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// In-memory bucket.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    page_size: usize,
}

impl InMemoryObjectStore {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the number of objects per listing page (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store an object directly with an explicit modification time.
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>, last_modified: DateTime<Utc>) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(
            key.into(),
            StoredObject {
                data,
                last_modified,
            },
        );
    }

    /// Contents of the object at `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(key).map(|o| o.data.clone())
    }

    /// All keys, in order.
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.keys().cloned().collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn report_chunks(data_len: usize, file_name: &str, progress: &dyn TransferProgress) {
    let total = data_len as u64;
    let mut sent = 0usize;
    loop {
        sent = (sent + TRANSFER_CHUNK_SIZE).min(data_len);
        progress
            .on_progress(TransferInfo {
                bytes_transferred: sent as u64,
                total_bytes: total,
                file_name: file_name.to_string(),
            })
            .await;
        if sent >= data_len {
            break;
        }
    }
}

fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        source: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, StorageError> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        let len = data.len();

        report_chunks(len, file_name_of(key), progress).await;
        self.insert(key, data, Utc::now());
        Ok(len as u64)
    }

    async fn get_object(
        &self,
        key: &str,
        destination: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, StorageError> {
        let data = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let len = data.len();

        tokio::fs::write(destination, &data)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        report_chunks(len, file_name_of(key), progress).await;
        Ok(len as u64)
    }

    async fn list_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ObjectListing, StorageError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());

        let lower = match marker {
            Some(m) => Bound::Excluded(m.to_string()),
            None => Bound::Unbounded,
        };

        let mut matching = objects
            .range((lower, Bound::Unbounded))
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectInfo {
                key: key.clone(),
                last_modified: obj.last_modified,
                size: obj.data.len() as u64,
            });

        let page: Vec<ObjectInfo> = matching.by_ref().take(self.page_size).collect();
        let is_truncated = matching.next().is_some();

        Ok(ObjectListing {
            objects: page,
            is_truncated,
        })
    }
}
