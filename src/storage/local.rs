//! Local directory object store.
//!
//! A bucket is a directory; object keys are relative paths using `/` as the
//! separator. Uploads are written to a hidden `.<name>.partial` sibling and
//! renamed into place once complete, so listings never see a truncated object.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{
    DEFAULT_PAGE_SIZE, ObjectInfo, ObjectListing, ObjectStore, StorageError, TRANSFER_CHUNK_SIZE,
    TransferInfo, TransferProgress,
};

const PARTIAL_SUFFIX: &str = ".partial";

/// Bucket backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`. The directory is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the number of objects per listing page (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Bucket root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// In-flight upload file for `destination`.
    fn partial_path(destination: &Path) -> PathBuf {
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        destination.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"))
    }

    fn is_partial(name: &std::ffi::OsStr) -> bool {
        let name = name.to_string_lossy();
        name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
    }

    /// Walk the bucket and collect every object, sorted by key.
    fn scan(root: &Path) -> std::io::Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        if !root.exists() {
            return Ok(objects);
        }

        let mut dirs = vec![root.to_path_buf()];
        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                let path = entry.path();
                if metadata.is_dir() {
                    dirs.push(path);
                    continue;
                }
                if Self::is_partial(&entry.file_name()) {
                    continue;
                }

                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let last_modified: DateTime<Utc> = metadata.modified()?.into();

                objects.push(ObjectInfo {
                    key,
                    last_modified,
                    size: metadata.len(),
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

/// Stream `reader` into `writer`, reporting progress after each chunk.
async fn copy_with_progress<R, W>(
    key: &str,
    mut reader: R,
    mut writer: W,
    total_bytes: u64,
    progress: &dyn TransferProgress,
) -> Result<u64, StorageError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let file_name = key.rsplit('/').next().unwrap_or(key).to_string();
    let mut buffer = vec![0u8; TRANSFER_CHUNK_SIZE];
    let mut transferred = 0u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .await
            .map_err(|e| StorageError::io(key, e))?;
        transferred += read as u64;

        progress
            .on_progress(TransferInfo {
                bytes_transferred: transferred,
                total_bytes,
                file_name: file_name.clone(),
            })
            .await;
    }

    writer.flush().await.map_err(|e| StorageError::io(key, e))?;
    Ok(transferred)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(
        &self,
        key: &str,
        source: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, StorageError> {
        let destination = self.object_path(key)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(key, e))?;
        }

        let reader = tokio::fs::File::open(source)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        let total = reader
            .metadata()
            .await
            .map_err(|e| StorageError::io(key, e))?
            .len();

        let partial = Self::partial_path(&destination);
        let written = async {
            let writer = tokio::fs::File::create(&partial)
                .await
                .map_err(|e| StorageError::io(key, e))?;
            let written = copy_with_progress(key, reader, writer, total, progress).await?;
            tokio::fs::rename(&partial, &destination)
                .await
                .map_err(|e| StorageError::io(key, e))?;
            Ok::<_, StorageError>(written)
        }
        .await;

        if written.is_err()
            && let Err(e) = tokio::fs::remove_file(&partial).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(key, error = %e, "Failed to remove partial upload");
        }
        written
    }

    async fn get_object(
        &self,
        key: &str,
        destination: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, StorageError> {
        let source = self.object_path(key)?;
        let reader = match tokio::fs::File::open(&source).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StorageError::io(key, e)),
        };
        let total = reader
            .metadata()
            .await
            .map_err(|e| StorageError::io(key, e))?
            .len();
        let writer = tokio::fs::File::create(destination)
            .await
            .map_err(|e| StorageError::io(key, e))?;

        copy_with_progress(key, reader, writer, total, progress).await
    }

    async fn list_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ObjectListing, StorageError> {
        let root = self.root.clone();
        let all = tokio::task::spawn_blocking(move || Self::scan(&root))
            .await
            .map_err(|e| StorageError::Other(format!("listing task failed: {e}")))?
            .map_err(|e| StorageError::io(prefix, e))?;

        let mut matching = all
            .into_iter()
            .filter(|o| o.key.starts_with(prefix))
            .filter(|o| marker.is_none_or(|m| o.key.as_str() > m));

        let objects: Vec<ObjectInfo> = matching.by_ref().take(self.page_size).collect();
        let is_truncated = matching.next().is_some();

        Ok(ObjectListing {
            objects,
            is_truncated,
        })
    }
}
