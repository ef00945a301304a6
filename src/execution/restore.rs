//! Restore executor: locate, download, decompress, restore.

use async_trait::async_trait;
use std::sync::Arc;

use super::command::{DatabaseCommand, Placeholders};
use super::compress::Compressor;
use super::executor::{ExecutionContext, ExecutionError, ExecutionResult, Executor, TempFiles};
use crate::core::target::RestoreTarget;
use crate::events::TargetStage;
use crate::storage::{ObjectInfo, ObjectStore, TransferInfo, latest_object};

/// Restores one catalog from the newest backup in its bucket.
pub struct RestoreExecutor {
    target: RestoreTarget,
    store: Arc<dyn ObjectStore>,
    context: ExecutionContext,
    compressor: Compressor,
}

impl RestoreExecutor {
    /// Create an executor for `target` reading from `store`.
    pub fn new(
        target: RestoreTarget,
        store: Arc<dyn ObjectStore>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            target,
            store,
            context,
            compressor: Compressor::new(),
        }
    }

    /// Newest backup matching the target's search prefix.
    pub async fn find_latest_backup(&self) -> Result<ObjectInfo, ExecutionError> {
        let prefix = self.target.search_prefix();
        latest_object(self.store.as_ref(), &prefix)
            .await?
            .ok_or_else(|| ExecutionError::NoBackupFound {
                bucket: self.target.storage.bucket_name.clone(),
                prefix,
            })
    }

    /// Run the restore, returning the key of the restored backup.
    pub async fn run(&self) -> Result<String, ExecutionError> {
        let mut temp_files = TempFiles::default();
        let result = self.run_steps(&mut temp_files).await;
        temp_files.remove_all().await;
        result
    }

    async fn run_steps(&self, temp_files: &mut TempFiles) -> Result<String, ExecutionError> {
        let emitter = &self.context.emitter;
        let temp_dir = &self.context.temp_dir;

        let backup = self.find_latest_backup().await?;
        tracing::debug!(
            target_name = %self.target.name,
            key = %backup.key,
            last_modified = %backup.last_modified,
            "Selected backup to restore"
        );

        tokio::fs::create_dir_all(temp_dir)
            .await
            .map_err(|e| ExecutionError::io(format!("creating '{}'", temp_dir.display()), e))?;

        let file_name = backup.file_name().to_string();
        let local_name = format!(
            "{}_{}",
            uuid::Uuid::new_v4().simple(),
            self.target.relative_key(&backup.key).replace('/', "_")
        );
        let archive = temp_files.track(temp_dir.join(local_name));

        emitter
            .emit(TargetStage::TransferStarted(TransferInfo {
                bytes_transferred: 0,
                total_bytes: backup.size,
                file_name: file_name.clone(),
            }))
            .await;
        let downloaded = self.store.get_object(&backup.key, &archive, emitter).await?;
        emitter
            .emit(TargetStage::TransferCompleted(TransferInfo {
                bytes_transferred: downloaded,
                total_bytes: backup.size,
                file_name,
            }))
            .await;

        emitter.emit(TargetStage::DecompressStarted).await;
        let dump_path = self.compressor.decompress(&archive).await?;
        temp_files.track(dump_path.clone());
        emitter.emit(TargetStage::DecompressCompleted).await;

        let restore_path = &self.target.restore_path;
        tokio::fs::create_dir_all(restore_path).await.map_err(|e| {
            ExecutionError::io(format!("creating '{}'", restore_path.display()), e)
        })?;

        emitter.emit(TargetStage::Started).await;
        let command = DatabaseCommand::new(
            &self.target.data_source.restore_command,
            &self.target.data_source,
            &Placeholders::new()
                .set("catalog", &self.target.catalog_name)
                .set("restore_catalog", &self.target.restore_catalog_name)
                .set("restore_path", restore_path.to_string_lossy())
                .set("path", dump_path.to_string_lossy()),
            self.context.database_timeout,
        );
        command.run().await?;
        emitter.emit(TargetStage::Completed).await;

        Ok(backup.key)
    }
}

#[async_trait]
impl Executor for RestoreExecutor {
    async fn execute(&self) -> ExecutionResult {
        self.run().await.map(|_| ()).into()
    }
}
