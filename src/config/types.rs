//! Configuration type definitions.
//!
//! These mirror the YAML file one to one. [`Settings`](super::Settings) is the
//! validated, resolved form used at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::schedule::RepeatRule;
use crate::core::target::{DataSource, StorageTarget};

/// Default timeout for database commands, in seconds.
pub const DEFAULT_DATABASE_TIMEOUT_SECS: u64 = 600;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Timeout for each database command, in seconds.
    pub database_timeout_secs: u64,
    /// Scratch directory for backups. Empty or unset means the system temp dir.
    pub backup_temp_dir: Option<PathBuf>,
    /// Scratch directory for restores. Empty or unset means the system temp dir.
    pub restore_temp_dir: Option<PathBuf>,
    /// Database servers.
    pub data_sources: Vec<DataSource>,
    /// Buckets.
    pub storage_targets: Vec<StorageTarget>,
    /// Catalogs to back up.
    pub backup_targets: Vec<BackupTargetConfig>,
    /// Catalogs to restore.
    pub restore_targets: Vec<RestoreTargetConfig>,
    /// Recurring schedules.
    pub schedules: Vec<ScheduleConfig>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            database_timeout_secs: DEFAULT_DATABASE_TIMEOUT_SECS,
            backup_temp_dir: None,
            restore_temp_dir: None,
            data_sources: Vec::new(),
            storage_targets: Vec::new(),
            backup_targets: Vec::new(),
            restore_targets: Vec::new(),
            schedules: Vec::new(),
        }
    }
}

/// Backup target entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTargetConfig {
    /// Target name.
    pub name: String,
    /// Catalog to back up.
    pub catalog_name: String,
    /// Name of the data source hosting the catalog.
    pub data_source: String,
    /// Name of the bucket receiving backups.
    pub bucket_name: String,
    /// Optional key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Restore target entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreTargetConfig {
    /// Target name.
    pub name: String,
    /// Catalog whose backups are restored.
    pub catalog_name: String,
    /// Catalog to restore into; defaults to `catalog_name`.
    #[serde(default)]
    pub restore_catalog_name: Option<String>,
    /// Directory for the restored database files.
    pub restore_path: PathBuf,
    /// Name of the data source to restore on.
    pub data_source: String,
    /// Name of the bucket holding backups.
    pub bucket_name: String,
    /// Optional key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Schedule entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Schedule name.
    pub name: String,
    /// First run, RFC 3339 or naive local time.
    pub start_date: String,
    /// IANA timezone for a naive `start_date`.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Repeat rule.
    #[serde(default)]
    pub repeat: RepeatRule,
    /// Backup target names, in execution order.
    #[serde(default)]
    pub backup_targets: Vec<String>,
    /// Restore target names, in execution order.
    #[serde(default)]
    pub restore_targets: Vec<String>,
}
