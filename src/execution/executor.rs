//! Executor traits and results.
//!
//! An executor runs one backup or restore target from start to finish. The
//! job runner builds a fresh executor for every target through an
//! [`ExecutorFactory`], so tests can substitute scripted executors.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::backup::BackupExecutor;
use super::restore::RestoreExecutor;
use crate::core::target::{BackupTarget, RestoreTarget};
use crate::events::TargetEmitter;
use crate::storage::{StorageError, StoreRegistry};

/// Errors that can occur while executing a target.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The command could not be started.
    #[error("failed to start '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    /// The command exceeded the database timeout.
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// The command exited with a non-zero status.
    #[error("'{program}' failed with exit code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    /// The dump command reported success but wrote nothing.
    #[error("backup command produced no file at '{0}'")]
    MissingDump(PathBuf),

    /// A downloaded file does not carry the `.gz` extension.
    #[error("'{0}' is not a gzip archive name")]
    NotGzip(PathBuf),

    /// Filesystem error.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Object storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No backup matched the restore target's search prefix.
    #[error("no backup found under '{prefix}' in bucket '{bucket}'")]
    NoBackupFound { bucket: String, prefix: String },

    /// The executor panicked.
    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExecutionError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Outcome of executing one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Whether the target succeeded.
    pub success: bool,
    /// Error if the target failed.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Create a successful result.
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

impl From<Result<(), ExecutionError>> for ExecutionResult {
    fn from(result: Result<(), ExecutionError>) -> Self {
        match result {
            Ok(()) => ExecutionResult::success(),
            Err(e) => ExecutionResult::failure(e.to_string()),
        }
    }
}

/// Runs one target.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute the target, reporting progress through the executor's emitter.
    async fn execute(&self) -> ExecutionResult;
}

/// Settings handed to every executor.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Tags and emits stage events.
    pub emitter: TargetEmitter,
    /// Timeout for each database command.
    pub database_timeout: Duration,
    /// Scratch directory for intermediate files.
    pub temp_dir: PathBuf,
}

/// Intermediate files removed once an executor finishes, whatever the outcome.
#[derive(Debug, Default)]
pub(crate) struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub(crate) fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }

    pub(crate) async fn remove_all(self) {
        for path in self.paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
    }
}

/// Builds executors for resolved targets.
pub trait ExecutorFactory: Send + Sync {
    /// Executor for a backup target.
    fn backup_executor(&self, target: BackupTarget, context: ExecutionContext)
    -> Box<dyn Executor>;

    /// Executor for a restore target.
    fn restore_executor(
        &self,
        target: RestoreTarget,
        context: ExecutionContext,
    ) -> Box<dyn Executor>;
}

/// Builds the real backup and restore executors.
#[derive(Default)]
pub struct DefaultExecutorFactory {
    stores: Arc<StoreRegistry>,
}

impl DefaultExecutorFactory {
    /// Create a factory with its own store registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory sharing `stores`.
    pub fn with_stores(stores: Arc<StoreRegistry>) -> Self {
        Self { stores }
    }

    /// Store registry used to open buckets.
    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }
}

impl ExecutorFactory for DefaultExecutorFactory {
    fn backup_executor(
        &self,
        target: BackupTarget,
        context: ExecutionContext,
    ) -> Box<dyn Executor> {
        let store = self.stores.open(&target.storage);
        Box::new(BackupExecutor::new(target, store, context))
    }

    fn restore_executor(
        &self,
        target: RestoreTarget,
        context: ExecutionContext,
    ) -> Box<dyn Executor> {
        let store = self.stores.open(&target.storage);
        Box::new(RestoreExecutor::new(target, store, context))
    }
}
