//! Backup executor: dump, compress, upload.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use super::command::{DatabaseCommand, Placeholders};
use super::compress::Compressor;
use super::executor::{ExecutionContext, ExecutionError, ExecutionResult, Executor, TempFiles};
use crate::core::target::{BACKUP_EXTENSION, BackupTarget, backup_file_name};
use crate::events::TargetStage;
use crate::storage::{ObjectStore, TransferInfo};

/// Backs up one catalog to its bucket.
///
/// The dump is written to a uniquely named scratch file, renamed to
/// `<catalog>_<timestamp>.bak`, gzipped, and uploaded under the target's
/// prefix. Scratch files are removed afterwards.
pub struct BackupExecutor {
    target: BackupTarget,
    store: Arc<dyn ObjectStore>,
    context: ExecutionContext,
    compressor: Compressor,
}

impl BackupExecutor {
    /// Create an executor for `target` uploading into `store`.
    pub fn new(target: BackupTarget, store: Arc<dyn ObjectStore>, context: ExecutionContext) -> Self {
        Self {
            target,
            store,
            context,
            compressor: Compressor::new(),
        }
    }

    /// Run the backup, returning the uploaded object key.
    pub async fn run(&self) -> Result<String, ExecutionError> {
        let mut temp_files = TempFiles::default();
        let result = self.run_steps(&mut temp_files).await;
        temp_files.remove_all().await;
        result
    }

    async fn run_steps(&self, temp_files: &mut TempFiles) -> Result<String, ExecutionError> {
        let emitter = &self.context.emitter;
        let temp_dir = &self.context.temp_dir;
        tokio::fs::create_dir_all(temp_dir)
            .await
            .map_err(|e| ExecutionError::io(format!("creating '{}'", temp_dir.display()), e))?;

        let dump_path = temp_files.track(
            temp_dir.join(format!("{}.{}", uuid::Uuid::new_v4(), BACKUP_EXTENSION)),
        );

        emitter.emit(TargetStage::Started).await;
        let command = DatabaseCommand::new(
            &self.target.data_source.backup_command,
            &self.target.data_source,
            &Placeholders::new()
                .set("catalog", &self.target.catalog_name)
                .set("path", dump_path.to_string_lossy()),
            self.context.database_timeout,
        );
        command.run().await?;
        if !tokio::fs::try_exists(&dump_path).await.unwrap_or(false) {
            return Err(ExecutionError::MissingDump(dump_path));
        }
        emitter.emit(TargetStage::Completed).await;

        let named_path: PathBuf = temp_files
            .track(temp_dir.join(backup_file_name(&self.target.catalog_name, Utc::now())));
        tokio::fs::rename(&dump_path, &named_path)
            .await
            .map_err(|e| ExecutionError::io(format!("renaming '{}'", dump_path.display()), e))?;

        emitter.emit(TargetStage::CompressStarted).await;
        let archive = temp_files.track(self.compressor.compress(&named_path).await?);
        emitter.emit(TargetStage::CompressCompleted).await;

        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = self.target.object_key(&file_name);
        let total_bytes = tokio::fs::metadata(&archive)
            .await
            .map_err(|e| ExecutionError::io(format!("reading '{}'", archive.display()), e))?
            .len();

        emitter
            .emit(TargetStage::TransferStarted(TransferInfo {
                bytes_transferred: 0,
                total_bytes,
                file_name: file_name.clone(),
            }))
            .await;
        let uploaded = self.store.put_object(&key, &archive, emitter).await?;
        emitter
            .emit(TargetStage::TransferCompleted(TransferInfo {
                bytes_transferred: uploaded,
                total_bytes,
                file_name,
            }))
            .await;

        tracing::debug!(
            target_name = %self.target.name,
            bucket = %self.target.storage.bucket_name,
            key = %key,
            bytes = uploaded,
            "Backup uploaded"
        );
        Ok(key)
    }
}

#[async_trait]
impl Executor for BackupExecutor {
    async fn execute(&self) -> ExecutionResult {
        self.run().await.map(|_| ()).into()
    }
}
