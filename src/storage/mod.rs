//! Object storage abstraction for uploading and locating backups.
//!
//! This module provides a trait-based bucket abstraction with pluggable
//! backends (local directory, in-memory). Listing is paginated the way remote
//! object stores page their results: callers pass the last key they saw as a
//! marker and keep going while the listing is truncated.

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::core::target::{StorageBackend, StorageTarget};

/// Default number of objects returned per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Size of the chunks moved between progress reports.
pub(crate) const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The key cannot be mapped onto the backend.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Filesystem error while reading or writing an object.
    #[error("storage I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    pub(crate) fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            key: key.into(),
            source,
        }
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key.
    pub key: String,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
    /// Object size in bytes.
    pub size: u64,
}

impl ObjectInfo {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    /// Objects in key order.
    pub objects: Vec<ObjectInfo>,
    /// Whether more objects follow this page.
    pub is_truncated: bool,
}

/// Bytes moved so far in an upload or download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    /// Bytes transferred so far.
    pub bytes_transferred: u64,
    /// Total size of the transfer.
    pub total_bytes: u64,
    /// File being transferred.
    pub file_name: String,
}

/// Receives progress reports during a transfer.
#[async_trait]
pub trait TransferProgress: Send + Sync {
    /// Called after each chunk.
    async fn on_progress(&self, info: TransferInfo);
}

/// Progress sink that discards reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

#[async_trait]
impl TransferProgress for NoProgress {
    async fn on_progress(&self, _info: TransferInfo) {}
}

/// A single bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `source` under `key`, replacing any existing object.
    ///
    /// Returns the number of bytes uploaded.
    async fn put_object(
        &self,
        key: &str,
        source: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, StorageError>;

    /// Download the object at `key` into `destination`.
    ///
    /// Returns the number of bytes downloaded.
    async fn get_object(
        &self,
        key: &str,
        destination: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, StorageError>;

    /// List objects whose key starts with `prefix`, in key order, starting
    /// after `marker`.
    async fn list_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ObjectListing, StorageError>;
}

/// List every object under `prefix`, following pagination.
pub async fn list_all(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Vec<ObjectInfo>, StorageError> {
    let mut objects = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let page = store.list_objects(prefix, marker.as_deref()).await?;
        let last_key = page.objects.last().map(|o| o.key.clone());
        objects.extend(page.objects);

        match (page.is_truncated, last_key) {
            (true, Some(key)) => marker = Some(key),
            _ => break,
        }
    }

    Ok(objects)
}

/// Most recently modified object under `prefix`, if any.
pub async fn latest_object(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Option<ObjectInfo>, StorageError> {
    let objects = list_all(store, prefix).await?;
    Ok(objects
        .into_iter()
        .max_by(|a, b| a.last_modified.cmp(&b.last_modified).then_with(|| a.key.cmp(&b.key))))
}

/// Opens stores for storage targets.
///
/// In-memory buckets are shared by name for the registry's lifetime, so a
/// backup and a later restore in the same process see the same objects.
#[derive(Default)]
pub struct StoreRegistry {
    memory: Mutex<HashMap<String, Arc<InMemoryObjectStore>>>,
}

impl StoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backing `target`.
    pub fn open(&self, target: &StorageTarget) -> Arc<dyn ObjectStore> {
        match &target.backend {
            StorageBackend::Local { path } => Arc::new(LocalObjectStore::new(path)),
            StorageBackend::Memory => self.memory_bucket(&target.bucket_name),
        }
    }

    /// Shared in-memory bucket named `bucket_name`, created on first use.
    pub fn memory_bucket(&self, bucket_name: &str) -> Arc<InMemoryObjectStore> {
        let mut buckets = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .entry(bucket_name.to_string())
            .or_insert_with(|| Arc::new(InMemoryObjectStore::new()))
            .clone()
    }
}
