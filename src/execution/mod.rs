//! Backup and restore execution.
//!
//! This module runs single targets: database commands, gzip compression, and
//! transfers to and from object storage.

mod backup;
mod command;
mod compress;
mod executor;
mod restore;

pub use backup::BackupExecutor;
pub use command::{CommandOutput, DatabaseCommand, PASSWORD_ENV, Placeholders, USER_ENV};
pub use compress::{Compressor, GZIP_EXTENSION, compressed_path, decompressed_path};
pub use executor::{
    DefaultExecutorFactory, ExecutionContext, ExecutionError, ExecutionResult, Executor,
    ExecutorFactory,
};
pub use restore::RestoreExecutor;
